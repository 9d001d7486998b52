mod control_plane;
mod resource_key;
mod status;

pub use control_plane::*;
pub use resource_key::*;
pub use status::*;
