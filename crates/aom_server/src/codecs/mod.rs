//! Codecs shipped with the engine.

mod proxy;

pub use proxy::{
    proxy_protocol, ProxyClientCodec, ProxyClientMessage, ProxyPingCodec, ProxyPingMessage,
    ProxyServerCodec, ProxyServerMessage,
};
