pub mod cancel;
pub mod dispatcher;
pub mod packet;
pub mod refresher;
pub mod transport;
