pub mod area;
pub mod command;
pub mod mode;
pub mod reading;
pub mod relay;

pub use area::*;
pub use command::*;
pub use mode::*;
pub use reading::*;
pub use relay::*;
