mod file_system;
mod log;
mod process;
mod progress_bar;

pub use file_system::*;
pub use self::log::{default_log_dir, log_file_in, logger_is_set, Logger};
pub use process::*;
pub use progress_bar::CliProgress;

/// Generate a builder-style setter for a field.
///
/// ```ignore
/// setter!(quiet(self.quiet, bool));
/// ```
#[macro_export]
macro_rules! setter {
    ($name:ident ($self:ident.$field:ident, $t:ty)) => {
        #[allow(clippy::wrong_self_convention)]
        pub fn $name(mut $self, val: $t) -> Self {
            $self.$field = val;
            $self
        }
    };
    ($name:ident ($self:ident.$field:ident, $arg:ident : $t:ty) { $($init:tt)+ }) => {
        #[allow(clippy::wrong_self_convention)]
        pub fn $name(mut $self, $arg: $t) -> Self {
            $self.$field = { $($init)+ };
            $self
        }
    };
}

/// Lowercased file stem of the running program, such as `atlas-installer`.
pub fn lowercase_program_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    let stem = exe.file_stem()?.to_str()?;
    Some(stem.to_lowercase())
}
