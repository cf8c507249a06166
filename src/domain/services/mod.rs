mod resolver;
mod transition;

pub use resolver::ServerResolver;
pub(crate) use resolver::strip_port;
pub use transition::Transition;
