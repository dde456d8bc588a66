use assert_cmd::Command;
use std::path::Path;

pub fn opsdash_bin() -> Command {
    #[allow(deprecated)]
    {
        Command::cargo_bin("opsdash").expect("opsdash test binary should build")
    }
}

/// Binary pointed at a throwaway SQLite file inside `dir`, with no config file
/// and no inherited store credentials.
pub fn opsdash_in(dir: &Path) -> Command {
    let mut cmd = opsdash_bin();
    cmd.current_dir(dir)
        .env("OPSDASH_CONFIG", dir.join("config.toml"))
        .env("OPSDASH_DB_PATH", dir.join("opsdash.db"))
        .env_remove("STORE_PROJECT_ID")
        .env_remove("STORE_CLIENT_EMAIL")
        .env_remove("STORE_PRIVATE_KEY")
        .env("RUST_LOG", "warn");
    cmd
}
