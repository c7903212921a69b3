//! Text commands from a profiler, carried in frames.
//!
//! Each frame holds one command line, each reply is one frame starting with
//! `ok` or `error:`.
//!
//! | command                        | effect                                   |
//! |--------------------------------|------------------------------------------|
//! | `probes`                       | one line per probe: name, site, state     |
//! | `enable <name>`                | enable a probe                           |
//! | `disable <name>`               | disable a probe                          |
//! | `counters <generic> [fixed..]` | reconfigure the recorders, reply the slot |
//! | `reset`                        | back to timestamp-only recording         |

use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::{Framer, encode_frame};
use log::{debug, info, warn};
use std::fmt::Write as _;
use std::io::{Read, Write};

/// Run one command against `session` and build its reply.
pub fn handle(session: &mut Session, command: &[u8]) -> String {
    match execute(session, command) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("command failed: {e}");
            format!("error: {e}")
        }
    }
}

fn execute(session: &mut Session, command: &[u8]) -> Result<String> {
    let line = std::str::from_utf8(command)
        .map_err(|_| Error::InvalidArgument("command is not utf-8".to_string()))?;
    let mut words = line.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();
    debug!("command {name} {args:?}");

    match (name, args.as_slice()) {
        ("probes", []) => {
            let mut reply = String::from("ok");
            for probe in session.probes() {
                let state = if probe.is_enabled() { "enabled" } else { "disabled" };
                let _ = write!(
                    reply,
                    "\n{} {}:{} {}",
                    probe.name(),
                    probe.file(),
                    probe.line(),
                    state
                );
            }
            Ok(reply)
        }
        ("enable", [probe]) => {
            session.enable_probe(probe)?;
            Ok("ok".to_string())
        }
        ("disable", [probe]) => {
            session.disable_probe(probe)?;
            Ok("ok".to_string())
        }
        ("counters", [generic, fixed @ ..]) => {
            let generic = parse_index(generic)?;
            let fixed = fixed
                .iter()
                .map(|index| parse_index(index))
                .collect::<Result<Vec<u8>>>()?;
            let slot = session.configure_counters(generic, &fixed)?;
            Ok(format!("ok {slot}"))
        }
        ("reset", []) => {
            session.reset_counters();
            Ok("ok".to_string())
        }
        _ => Err(Error::InvalidArgument(format!("unknown command '{}'", line.trim()))),
    }
}

fn parse_index(text: &str) -> Result<u8> {
    text.parse()
        .map_err(|_| Error::InvalidArgument(format!("'{text}' is not a counter index")))
}

/// Answer framed commands until the peer disconnects. Returns how many
/// commands were handled.
///
/// `reader` is expected to block; a non-blocking one is polled in a busy loop.
pub fn serve<R: Read, W: Write>(session: &mut Session, reader: R, writer: &mut W) -> Result<usize> {
    let mut framer = Framer::new(reader);
    let mut handled = 0;
    loop {
        match framer.read_frame() {
            Ok(Some(frame)) => {
                let reply = handle(session, &frame);
                writer.write_all(&encode_frame(reply.as_bytes())?)?;
                writer.flush()?;
                handled += 1;
            }
            Ok(None) => continue,
            Err(Error::Disconnected) => break,
            Err(e) => return Err(e),
        }
    }
    info!("control stream closed after {handled} commands");
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use xprobe_trace::{CallSite, CallSiteAttrs, CounterSource, Dispatch};

    struct Zero;

    impl CounterSource for Zero {
        fn read(_selector: u32) -> u64 {
            0
        }
    }

    static DISPATCH: Dispatch = Dispatch::new::<Zero>();
    static REMOTE: CallSite = CallSite::new("Remote", file!(), line!(), CallSiteAttrs::NONE);

    fn session() -> Session {
        let mut session = Session::with_dispatch(SessionConfig::default(), &DISPATCH);
        session.attach(&REMOTE);
        session
    }

    fn replies(mut stream: &[u8]) -> Vec<String> {
        let mut framer = Framer::new(&mut stream);
        let mut out = Vec::new();
        loop {
            match framer.read_frame() {
                Ok(Some(frame)) => out.push(String::from_utf8(frame.into_inner()).unwrap()),
                Ok(None) => {}
                Err(Error::Disconnected) => return out,
                Err(e) => panic!("bad reply stream: {e}"),
            }
        }
    }

    #[test]
    fn test_toggle_site_over_stream() {
        let mut session = session();
        let mut input = Vec::new();
        for command in ["disable Remote", "probes", "enable Remote", "enable Missing"] {
            input.extend(encode_frame(command.as_bytes()).unwrap());
        }

        let mut output = Vec::new();
        let handled = serve(&mut session, input.as_slice(), &mut output).unwrap();
        assert_eq!(handled, 4);

        let replies = replies(&output);
        assert_eq!(replies[0], "ok");
        assert!(replies[1].starts_with("ok\n"));
        assert!(
            replies[1]
                .lines()
                .any(|line| line.starts_with("Remote ") && line.ends_with(" disabled"))
        );
        assert_eq!(replies[2], "ok");
        assert!(replies[3].starts_with("error:"));
        assert!(REMOTE.is_enabled());
    }

    #[test]
    fn test_counters_command_publishes_slot() {
        let mut session = session();
        assert_eq!(handle(&mut session, b"counters 2 0 1"), "ok 4");
        assert_eq!(DISPATCH.active_slot(), 4);

        assert!(handle(&mut session, b"counters 1 7").starts_with("error:"));
        assert_eq!(DISPATCH.active_slot(), 4);

        assert_eq!(handle(&mut session, b"reset"), "ok");
        assert_eq!(DISPATCH.active_slot(), 0);
    }

    #[test]
    fn test_unknown_and_malformed_commands() {
        let mut session = session();
        assert!(handle(&mut session, b"launch").starts_with("error: "));
        assert!(handle(&mut session, b"enable").starts_with("error: "));
        assert!(handle(&mut session, b"counters x").starts_with("error: "));
        assert!(handle(&mut session, &[0xff, 0xfe]).starts_with("error: "));
    }

    #[test]
    fn test_malformed_frame_ends_serving() {
        let mut session = session();
        let mut output = Vec::new();
        let result = serve(&mut session, &b"garbage!"[..], &mut output);
        assert!(matches!(result, Err(Error::MalformedFrame { .. })));
        assert!(output.is_empty());
    }
}
