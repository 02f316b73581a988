mod completion;
mod slack;

pub use completion::*;
pub use slack::*;
