//! TCP transport for the pewpew relay: framing, JSON envelopes, socket
//! setup, the relay server and a small client.

pub mod codec;
pub mod framing;
pub mod platform;
pub mod tcp_client;
pub mod tcp_server;

pub use codec::{CodecError, Envelope, decode_envelope, encode_envelope, frame_envelope};
pub use framing::{FrameConfig, FrameError, encode_frame, read_frame, write_frame};
pub use platform::{
    SocketConfig, configure_stream, create_listener, ipv4_bind_address, resolve_bind_address,
};
pub use tcp_client::{ClientError, ConnectionState, ConnectionStateWatch, RelayClient};
pub use tcp_server::{
    ConnectionLimitReached, ConnectionMap, DEFAULT_PORT, IdGenerator, RelayServer, ServerConfig,
};
