mod batch;
mod list;
mod review;
mod save;
mod wizard;

pub use batch::{batch_csv, batch_upload};
pub use list::{delete, get, list};
pub use review::{delete_context, review};
pub use save::save;
pub use wizard::{presets, wizard_existing, wizard_new};
