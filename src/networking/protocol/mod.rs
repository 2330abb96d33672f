pub mod codec;
pub mod targets;

pub use codec::{
    decode_request, decode_response, encode_request, FrameAssembler, HandshakeReply, PoseUpdate,
    RelayFrame, RelayGroup, Request, TargetSample,
};
pub use targets::{long_to_short, short_to_long, TargetName};
