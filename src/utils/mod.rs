pub mod constants;
pub mod fs_utils;

pub use constants::*;
pub use fs_utils::{
    BackupPolicy, LoadSource, backup_path, read_json_with_backup, temp_path, write_json_atomic,
    write_json_atomic_with,
};
