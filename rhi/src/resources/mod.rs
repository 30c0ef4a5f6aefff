//! Resource tables, access states and upload staging.

mod records;
mod state;
mod table;
mod upload_ring;

pub use records::{BufferRecord, SamplerRecord, TextureOwner, TextureRecord};
pub use state::ResourceState;
pub use table::HandleTable;
pub use upload_ring::{StagingAllocation, UploadRing, align_up};
