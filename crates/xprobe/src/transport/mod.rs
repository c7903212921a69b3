//! Length-prefixed framing for control-plane streams, used by
//! [`control::serve`](crate::control::serve).

mod framer;

pub use framer::{Cursor, Frame, Framer, HEADER_LEN, MAX_FRAME_LEN, encode_frame};
