pub mod commands;

use clap::{Arg, ArgAction, Command};

pub use commands::handle_subcommands;

fn slave_arg() -> Arg {
    Arg::new("slave")
        .short('s')
        .long("slave")
        .help("Slave address (unit id on TCP/UDP)")
        .default_value("1")
}

fn read_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(slave_arg())
        .arg(Arg::new("address").help("Start address").required(true))
        .arg(Arg::new("count").help("Number of points").required(true))
}

pub fn build_cli() -> Command {
    Command::new("ipc_modbus")
        .version(crate::VERSION)
        .about("Modbus master and slave over RTU, ASCII, TCP and UDP")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("transport")
                .short('t')
                .long("transport")
                .global(true)
                .value_parser(["rtu", "ascii", "tcp", "udp"])
                .help("Wire format"),
        )
        .arg(Arg::new("port").short('p').long("port").global(true).help("Serial port"))
        .arg(Arg::new("baud").short('b').long("baud").global(true).help("Serial baud rate"))
        .arg(Arg::new("host").long("host").global(true).help("TCP/UDP host or bind address"))
        .arg(Arg::new("tcp-port").long("tcp-port").global(true).help("TCP/UDP port"))
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .global(true)
                .value_parser(["console", "json", "hex"])
                .help("Output format"),
        )
        .subcommand(Command::new("list-ports").about("List available serial ports"))
        .subcommand(
            Command::new("slave")
                .about("Serve a data store until interrupted")
                .arg(Arg::new("unit-id").short('u').long("unit-id").help("Unit id answered on serial lines"))
                .arg(
                    Arg::new("store")
                        .long("store")
                        .value_parser(["default", "test", "empty"])
                        .help("Initial data store contents"),
                ),
        )
        .subcommand(read_command("read-coils", "Read coils (function 1)"))
        .subcommand(read_command("read-inputs", "Read discrete inputs (function 2)"))
        .subcommand(read_command("read-holding", "Read holding registers (function 3)"))
        .subcommand(read_command("read-input-registers", "Read input registers (function 4)"))
        .subcommand(
            Command::new("write-coil")
                .about("Write a single coil (function 5)")
                .arg(slave_arg())
                .arg(Arg::new("address").required(true))
                .arg(
                    Arg::new("value")
                        .required(true)
                        .value_parser(["on", "off", "1", "0", "true", "false"]),
                ),
        )
        .subcommand(
            Command::new("write-register")
                .about("Write a single holding register (function 6)")
                .arg(slave_arg())
                .arg(Arg::new("address").required(true))
                .arg(Arg::new("value").required(true)),
        )
        .subcommand(
            Command::new("write-registers")
                .about("Write consecutive holding registers (function 16)")
                .arg(slave_arg())
                .arg(Arg::new("address").required(true))
                .arg(
                    Arg::new("values")
                        .required(true)
                        .num_args(1..)
                        .action(ArgAction::Append)
                        .help("Register values, space or comma separated"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["ipc_modbus", "read-holding", "104", "2", "--transport", "tcp"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("transport").map(String::as_str), Some("tcp"));

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "read-holding");
        assert_eq!(sub.get_one::<String>("slave").map(String::as_str), Some("1"));
    }
}
