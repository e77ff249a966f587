//! ADC front-ends used on the Raspberry Pi build.
//!
//! ADS1115 (I2C, 16-bit, gain 1 = ±4.096 V full scale, 860 SPS single-shot) and
//! MCP3202 (SPI, 12-bit, referenced to the supply) plus a line-oriented serial
//! bridge for boards that stream voltages over UART.
use std::io::{BufRead, BufReader};
use std::time::Duration;
use crate::drivers::{SampleSource, StethoscopeError};
pub const ADS1115_DEFAULT_ADDRESS: u16 = 0x48;
pub const ADS1115_FULL_SCALE_VOLTS: f64 = 4.096;
pub const ADS1115_MAX_RAW: f64 = 32767.0;
pub const MCP3202_MAX_RAW: f64 = 4095.0;
const ADS1115_REG_CONVERSION: u8 = 0x00;
const ADS1115_REG_CONFIG: u8 = 0x01;
/// Config word for a single-shot conversion of `channel` against GND at gain 1 and 860 SPS.
pub fn ads1115_config_word(channel: u8) -> u16 {
    let os_single: u16 = 1 << 15;
    let mux: u16 = (0b100 | (channel as u16 & 0b11)) << 12;
    let pga_4v096: u16 = 0b001 << 9;
    let mode_single: u16 = 1 << 8;
    let dr_860: u16 = 0b111 << 5;
    let comp_disable: u16 = 0b11;
    os_single | mux | pga_4v096 | mode_single | dr_860 | comp_disable
}
pub fn ads1115_raw_to_volts(raw: i16) -> f64 {
    raw as f64 * ADS1115_FULL_SCALE_VOLTS / ADS1115_MAX_RAW
}
/// Command bytes for a single-ended MSB-first read of `channel`.
pub fn mcp3202_command(channel: u8) -> [u8; 3] {
    let odd = if channel == 0 { 0x00 } else { 0x40 };
    [0x01, 0x80 | odd | 0x20, 0x00]
}
pub fn mcp3202_raw_from_response(rx: &[u8; 3]) -> u16 {
    (((rx[1] & 0x0F) as u16) << 8) | rx[2] as u16
}
pub fn mcp3202_raw_to_volts(raw: u16, vref: f64) -> f64 {
    raw as f64 / MCP3202_MAX_RAW * vref
}
#[cfg(target_os = "linux")]
pub use linux::{probe_i2c, probe_spi, Ads1115Source, Mcp3202Source};
#[cfg(target_os = "linux")]
mod linux {
    use std::thread;
    use std::time::Duration;
    use i2cdev::core::I2CDevice;
    use i2cdev::linux::LinuxI2CDevice;
    use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
    use super::*;
    pub struct Ads1115Source {
        device: LinuxI2CDevice,
        path: String,
        address: u16,
        channel: u8,
    }
    impl Ads1115Source {
        pub fn open(bus: u8, address: u16, channel: u8) -> Result<Self, StethoscopeError> {
            let path = format!("/dev/i2c-{bus}");
            let device = LinuxI2CDevice::new(&path, address)
                .map_err(|e| StethoscopeError::transport(&path, e))?;
            Ok(Self {
                device,
                path,
                address,
                channel,
            })
        }
    }
    impl SampleSource for Ads1115Source {
        fn read_voltage(&mut self) -> Result<f64, StethoscopeError> {
            let config = ads1115_config_word(self.channel).to_be_bytes();
            let device = self.id();
            self.device
                .write(&[ADS1115_REG_CONFIG, config[0], config[1]])
                .map_err(|e| StethoscopeError::transport(&device, e))?;
            // one conversion at 860 SPS plus margin
            thread::sleep(Duration::from_micros(1_263));
            self.device
                .write(&[ADS1115_REG_CONVERSION])
                .map_err(|e| StethoscopeError::transport(&device, e))?;
            let mut buf = [0u8; 2];
            self.device
                .read(&mut buf)
                .map_err(|e| StethoscopeError::transport(&device, e))?;
            Ok(ads1115_raw_to_volts(i16::from_be_bytes(buf)))
        }
        fn id(&self) -> String {
            format!("ads1115@{}:{:#04x}/A{}", self.path, self.address, self.channel)
        }
        fn nominal_rate_hz(&self) -> Option<f64> {
            Some(860.0)
        }
    }
    pub struct Mcp3202Source {
        spi: Spidev,
        path: String,
        channel: u8,
        vref: f64,
    }
    impl Mcp3202Source {
        pub fn open(bus: u8, device: u8, channel: u8, vref: f64) -> Result<Self, StethoscopeError> {
            let path = format!("/dev/spidev{bus}.{device}");
            let spi = open_spi(&path)?;
            Ok(Self {
                spi,
                path,
                channel,
                vref,
            })
        }
    }
    impl SampleSource for Mcp3202Source {
        fn read_voltage(&mut self) -> Result<f64, StethoscopeError> {
            let tx = mcp3202_command(self.channel);
            let mut rx = [0u8; 3];
            {
                let mut transfer = SpidevTransfer::read_write(&tx, &mut rx);
                self.spi
                    .transfer(&mut transfer)
                    .map_err(|e| StethoscopeError::transport(&self.path, e))?;
            }
            Ok(mcp3202_raw_to_volts(mcp3202_raw_from_response(&rx), self.vref))
        }
        fn id(&self) -> String {
            format!("mcp3202@{}/CH{}", self.path, self.channel)
        }
    }
    fn open_spi(path: &str) -> Result<Spidev, StethoscopeError> {
        let mut spi = Spidev::open(path).map_err(|e| StethoscopeError::transport(path, e))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(1_000_000)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options)
            .map_err(|e| StethoscopeError::transport(path, e))?;
        Ok(spi)
    }
    /// True when a device answers a one-byte read at `address`.
    pub fn probe_i2c(bus: u8, address: u16) -> bool {
        let path = format!("/dev/i2c-{bus}");
        match LinuxI2CDevice::new(&path, address) {
            Ok(mut device) => device.smbus_read_byte().is_ok(),
            Err(_) => false,
        }
    }
    /// True when a minimal MCP3202 transfer returns a full response.
    pub fn probe_spi(bus: u8, device: u8) -> bool {
        let path = format!("/dev/spidev{bus}.{device}");
        let Ok(spi) = open_spi(&path) else {
            return false;
        };
        let tx = [0x01, 0x80, 0x00];
        let mut rx = [0u8; 3];
        let mut transfer = SpidevTransfer::read_write(&tx, &mut rx);
        spi.transfer(&mut transfer).is_ok()
    }
}
#[cfg(not(target_os = "linux"))]
pub fn probe_i2c(_bus: u8, _address: u16) -> bool {
    false
}
#[cfg(not(target_os = "linux"))]
pub fn probe_spi(_bus: u8, _device: u8) -> bool {
    false
}
/// ADC bridge that prints one voltage per line over a serial port.
pub struct SerialSource {
    reader: BufReader<Box<dyn serialport::SerialPort>>,
    path: String,
    line: String,
}
impl SerialSource {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, StethoscopeError> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| StethoscopeError::transport(path, e))?;
        Ok(Self {
            reader: BufReader::new(port),
            path: path.to_string(),
            line: String::new(),
        })
    }
}
impl SampleSource for SerialSource {
    fn read_voltage(&mut self) -> Result<f64, StethoscopeError> {
        self.line.clear();
        let read = self
            .reader
            .read_line(&mut self.line)
            .map_err(|e| StethoscopeError::transport(&self.path, e))?;
        if read == 0 {
            return Err(StethoscopeError::transport(&self.path, "port closed"));
        }
        self.line.trim().parse::<f64>().map_err(|e| {
            StethoscopeError::transport(&self.path, format!("bad reading {:?}: {e}", self.line.trim()))
        })
    }
    fn id(&self) -> String {
        format!("serial@{}", self.path)
    }
}
