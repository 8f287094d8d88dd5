//! Disk and network data serialization schemas shared between the server's subsystems:
//! coordinate newtypes, chunk storage representations and the binary chunk wire codec.

pub mod codec;
pub mod coordinates;
pub mod voxel;
