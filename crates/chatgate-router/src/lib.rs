mod proxy;

pub use proxy::gateway_router;
