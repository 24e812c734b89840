//! Length-delimited framing.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::ConnectionConfig;

/// A transport carrying length-delimited frames.
pub type FramedIo<T> = Framed<T, LengthDelimitedCodec>;

/// Attaches a length-delimited codec to the provided socket.
pub fn framed<T: AsyncRead + AsyncWrite>(io: T, config: &ConnectionConfig) -> FramedIo<T> {
    LengthDelimitedCodec::builder()
        .max_frame_length(config.max_frame_len())
        .new_framed(io)
}
