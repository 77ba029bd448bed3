use chrono::Utc;

use crate::utils::error::{ModbusError, ModbusResult};

/// Renders values read from or written to a slave.
pub trait DataFormatter: Send + Sync {
    fn format_registers(&self, slave_address: u8, start_address: u16, values: &[u16]) -> String;
    fn format_discretes(&self, slave_address: u8, start_address: u16, values: &[bool]) -> String;
    fn format_write(&self, slave_address: u8, start_address: u16, count: usize) -> String;
    fn format_header(&self) -> String;
}

/// Formatter registered under `name` (`console`, `json` or `hex`).
pub fn formatter_for(name: &str) -> ModbusResult<Box<dyn DataFormatter>> {
    match name {
        "console" => Ok(Box::new(ConsoleFormatter)),
        "json" => Ok(Box::new(JsonFormatter)),
        "hex" => Ok(Box::new(HexFormatter)),
        other => Err(ModbusError::ConfigError(format!("Unknown output format: {}", other))),
    }
}

pub struct ConsoleFormatter;

impl DataFormatter for ConsoleFormatter {
    fn format_registers(&self, slave_address: u8, start_address: u16, values: &[u16]) -> String {
        let mut output = format!("🔹 Slave {} registers:\n", slave_address);
        for (offset, value) in values.iter().enumerate() {
            output.push_str(&format!("  {:>5}: {}\n", start_address as usize + offset, value));
        }
        output
    }

    fn format_discretes(&self, slave_address: u8, start_address: u16, values: &[bool]) -> String {
        let mut output = format!("🔹 Slave {} discretes:\n", slave_address);
        for (offset, value) in values.iter().enumerate() {
            let state = if *value { "ON" } else { "OFF" };
            output.push_str(&format!("  {:>5}: {}\n", start_address as usize + offset, state));
        }
        output
    }

    fn format_write(&self, slave_address: u8, start_address: u16, count: usize) -> String {
        format!(
            "✅ Wrote {} point(s) to slave {} starting at {}\n",
            count, slave_address, start_address
        )
    }

    fn format_header(&self) -> String {
        format!("🚀 Modbus data - {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

pub struct JsonFormatter;

impl DataFormatter for JsonFormatter {
    fn format_registers(&self, slave_address: u8, start_address: u16, values: &[u16]) -> String {
        let result = serde_json::json!({
            "slave_address": slave_address,
            "start_address": start_address,
            "timestamp": Utc::now().to_rfc3339(),
            "registers": values,
        });
        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    fn format_discretes(&self, slave_address: u8, start_address: u16, values: &[bool]) -> String {
        let result = serde_json::json!({
            "slave_address": slave_address,
            "start_address": start_address,
            "timestamp": Utc::now().to_rfc3339(),
            "discretes": values,
        });
        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    fn format_write(&self, slave_address: u8, start_address: u16, count: usize) -> String {
        let result = serde_json::json!({
            "slave_address": slave_address,
            "start_address": start_address,
            "timestamp": Utc::now().to_rfc3339(),
            "written": count,
        });
        serde_json::to_string_pretty(&result).unwrap_or_default()
    }

    fn format_header(&self) -> String {
        String::new()
    }
}

/// Raw big-endian bytes, the way they travel on the wire.
pub struct HexFormatter;

impl DataFormatter for HexFormatter {
    fn format_registers(&self, _slave_address: u8, _start_address: u16, values: &[u16]) -> String {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        format!("{}\n", hex::encode_upper(bytes))
    }

    fn format_discretes(&self, _slave_address: u8, _start_address: u16, values: &[bool]) -> String {
        let bits: String = values.iter().map(|v| if *v { '1' } else { '0' }).collect();
        format!("{}\n", bits)
    }

    fn format_write(&self, _slave_address: u8, _start_address: u16, count: usize) -> String {
        format!("{}\n", count)
    }

    fn format_header(&self) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_registers() {
        let output = JsonFormatter.format_registers(1, 104, &[0, 513]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["slave_address"], 1);
        assert_eq!(parsed["registers"], serde_json::json!([0, 513]));
    }

    #[test]
    fn test_hex_output() {
        assert_eq!(HexFormatter.format_registers(1, 0, &[0x0102, 0xABCD]), "0102ABCD\n");
        assert_eq!(HexFormatter.format_discretes(1, 0, &[true, false, true]), "101\n");
    }

    #[test]
    fn test_console_addresses() {
        let output = ConsoleFormatter.format_discretes(2, 10, &[true, false]);
        assert!(output.contains("   10: ON"));
        assert!(output.contains("   11: OFF"));
    }

    #[test]
    fn test_unknown_format() {
        assert!(formatter_for("csv").is_err());
        assert!(formatter_for("hex").is_ok());
    }
}
