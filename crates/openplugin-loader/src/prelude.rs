//! Single-import surface for hosts and plugins.

pub use crate::console::{self, FileSink, LogLevel, LogSink, TracingSink};
pub use crate::error::{PluginLoaderError, PluginResult};
pub use crate::in_process::{self, InProcessLibrary};
pub use crate::loader::{Instance, PluginLoader, UniqueInstance};
pub use crate::multi_loader::MultiLibraryPluginLoader;
pub use crate::register_plugin;
pub use crate::registry;
pub use crate::shared_library::{platform_library_name, SharedLibrary};
