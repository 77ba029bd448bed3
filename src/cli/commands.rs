use anyhow::{anyhow, bail, Context, Result};
use clap::ArgMatches;
use log::info;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, DataStorePreset, TransportKind};
use crate::device::{ModbusMaster, ModbusSerialSlave, ModbusSlave, ModbusTcpSlave, ModbusUdpSlave};
use crate::io::stream_resource::available_ports;
use crate::io::{SerialPortAdapter, StreamResource};
use crate::output::{formatter_for, DataFormatter};

/// Serial read timeout of the slave loop, bounds how long a stop request waits.
const SLAVE_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Runs the requested subcommand. Returns false when none was given.
pub async fn handle_subcommands(matches: &ArgMatches, config: &Config) -> Result<bool> {
    let formatter = formatter_for(&config.output.default_format)?;

    match matches.subcommand() {
        Some(("list-ports", _)) => {
            list_ports()?;
        }
        Some(("slave", sub)) => {
            run_slave(sub, config).await?;
        }
        Some((name, sub)) => {
            let name = name.to_string();
            let sub = sub.clone();
            let config = config.clone();
            let output = tokio::task::spawn_blocking(move || -> Result<String> {
                let mut master = ModbusMaster::from_config(&config)?;
                run_master_command(&name, &sub, &mut master, formatter.as_ref())
            })
            .await??;

            print!("{}", output);
        }
        None => return Ok(false),
    }

    Ok(true)
}

fn list_ports() -> Result<()> {
    let ports = available_ports()?;
    println!("📡 Available Serial Ports:");
    if ports.is_empty() {
        println!("   ⚠️  No serial ports found");
        return Ok(());
    }

    for (index, port) in ports.iter().enumerate() {
        println!("   {}. {}", index + 1, port.port_name);
        if let serialport::SerialPortType::UsbPort(usb_info) = &port.port_type {
            if let Some(manufacturer) = &usb_info.manufacturer {
                println!("      📱 Manufacturer: {}", manufacturer);
            }
            if let Some(serial_number) = &usb_info.serial_number {
                println!("      🔢 Serial Number: {}", serial_number);
            }
        }
    }
    Ok(())
}

fn run_master_command(
    name: &str,
    matches: &ArgMatches,
    master: &mut ModbusMaster,
    formatter: &dyn DataFormatter,
) -> Result<String> {
    let slave: u8 = parse_arg(matches, "slave")?;
    let address: u16 = parse_arg(matches, "address")?;
    let mut output = formatter.format_header();

    match name {
        "read-coils" | "read-inputs" => {
            let count: u16 = parse_arg(matches, "count")?;
            let values = if name == "read-coils" {
                master.read_coils(slave, address, count)?
            } else {
                master.read_inputs(slave, address, count)?
            };
            output.push_str(&formatter.format_discretes(slave, address, &values));
        }
        "read-holding" | "read-input-registers" => {
            let count: u16 = parse_arg(matches, "count")?;
            let values = if name == "read-holding" {
                master.read_holding_registers(slave, address, count)?
            } else {
                master.read_input_registers(slave, address, count)?
            };
            output.push_str(&formatter.format_registers(slave, address, &values));
        }
        "write-coil" => {
            let value = parse_coil_state(required(matches, "value")?)?;
            master.write_single_coil(slave, address, value)?;
            output.push_str(&formatter.format_write(slave, address, 1));
        }
        "write-register" => {
            let value: u16 = parse_arg(matches, "value")?;
            master.write_single_register(slave, address, value)?;
            output.push_str(&formatter.format_write(slave, address, 1));
        }
        "write-registers" => {
            let values = parse_register_list(matches)?;
            master.write_multiple_registers(slave, address, &values)?;
            output.push_str(&formatter.format_write(slave, address, values.len()));
        }
        other => bail!("Unknown command: {}", other),
    }

    Ok(output)
}

async fn run_slave(matches: &ArgMatches, config: &Config) -> Result<()> {
    let unit_id = match matches.get_one::<String>("unit-id") {
        Some(value) => value.parse().with_context(|| format!("Invalid unit id: {}", value))?,
        None => config.slave.unit_id,
    };
    let preset = match matches.get_one::<String>("store").map(String::as_str) {
        Some("test") => DataStorePreset::Test,
        Some("empty") => DataStorePreset::Empty,
        Some(_) => DataStorePreset::Default,
        None => config.slave.data_store,
    };
    let slave = ModbusSlave::new(unit_id, Arc::new(preset.build()));

    match config.transport {
        TransportKind::Tcp => {
            let tcp_slave = Arc::new(
                ModbusTcpSlave::bind(slave, (config.network.host.as_str(), config.network.port)).await?,
            );
            let listener = tcp_slave.clone();
            let server = tokio::spawn(async move { listener.listen().await });

            tokio::signal::ctrl_c().await?;
            info!("🛑 Interrupt received");
            tcp_slave.stop();
            server.await??;
        }
        TransportKind::Udp => {
            let udp_slave = ModbusUdpSlave::bind(slave, (config.network.host.as_str(), config.network.port))?;
            let shutdown = udp_slave.shutdown_handle();
            let server = tokio::task::spawn_blocking(move || udp_slave.listen());

            tokio::signal::ctrl_c().await?;
            info!("🛑 Interrupt received");
            shutdown.request_stop();
            server.await??;
        }
        TransportKind::Rtu | TransportKind::Ascii => {
            let mut stream = SerialPortAdapter::open(&config.serial, SLAVE_POLL_TIMEOUT)?;
            stream.set_read_timeout(Some(SLAVE_POLL_TIMEOUT))?;
            let stream: Box<dyn StreamResource> = Box::new(stream);

            let mut serial_slave = if config.transport == TransportKind::Rtu {
                ModbusSerialSlave::create_rtu(slave, stream)
            } else {
                ModbusSerialSlave::create_ascii(slave, stream)
            };
            let shutdown = serial_slave.shutdown_handle();
            let server = tokio::task::spawn_blocking(move || serial_slave.listen());

            tokio::signal::ctrl_c().await?;
            info!("🛑 Interrupt received");
            shutdown.request_stop();
            server.await??;
        }
    }

    Ok(())
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing argument: {}", name))
}

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = required(matches, name)?;
    value
        .parse()
        .with_context(|| format!("Invalid {}: {}", name, value))
}

fn parse_coil_state(value: &str) -> Result<bool> {
    match value {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        other => bail!("Invalid coil state: {}", other),
    }
}

fn parse_register_list(matches: &ArgMatches) -> Result<Vec<u16>> {
    let raw = matches
        .get_many::<String>("values")
        .ok_or_else(|| anyhow!("Missing argument: values"))?;

    let mut values = Vec::new();
    for item in raw.flat_map(|value| value.split(',')) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        values.push(item.parse().with_context(|| format!("Invalid register value: {}", item))?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::build_cli;

    #[test]
    fn test_parse_register_list() {
        let matches = build_cli()
            .try_get_matches_from(["ipc_modbus", "write-registers", "10", "1,2", "3"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(parse_register_list(sub).unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_arg::<u16>(sub, "address").unwrap(), 10);
    }

    #[test]
    fn test_parse_coil_state() {
        assert!(parse_coil_state("on").unwrap());
        assert!(!parse_coil_state("0").unwrap());
        assert!(parse_coil_state("maybe").is_err());
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let matches = build_cli()
            .try_get_matches_from(["ipc_modbus", "write-register", "70000", "1"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert!(parse_arg::<u16>(sub, "address").is_err());
    }
}
