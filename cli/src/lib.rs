pub mod remarks_cmd;

pub use remarks_cmd::OptinfoCli;
pub use remarks_cmd::OptinfoCommand;
