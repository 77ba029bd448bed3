use anyhow::Result;
use log::info;

use ipc_modbus::cli::{build_cli, handle_subcommands};
use ipc_modbus::Config;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut cli = build_cli();
    let matches = cli.clone().get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_matches(&matches)?;
    info!("⚙️  Using {} transport", config.transport);

    if !handle_subcommands(&matches, &config).await? {
        cli.print_help()?;
        println!();
    }

    Ok(())
}
