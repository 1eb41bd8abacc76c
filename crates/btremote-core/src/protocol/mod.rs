//! Protocol module containing the discovery datagram codec and the RPC frames.

pub mod discovery;
pub mod rpc;

pub use discovery::{decode, encode, DiscoveryMessage, MessageError, PORT_FIELD_LEN, SEPARATOR};
pub use rpc::{
    decode_frame, decode_payload, encode_frame, payload_len, CallError, FrameError, RpcMethod, RpcReply, RpcRequest,
    RpcResponse, FRAME_HEADER_LEN, MAX_FRAME_LEN,
};
