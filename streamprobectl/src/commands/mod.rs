mod extract;
mod serve;

pub use extract::ExtractArgs;
pub use serve::ServeArgs;
