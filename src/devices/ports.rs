use serialport::SerialPortInfo;

use crate::errors::DeviceError;

/// The FTDI vendor id. XBee USB interface boards use an FTDI bridge.
pub const FTDI_USB_VID: u16 = 0x0403;

/// This structure incapsulates the information for a serial port that is
/// likely to have an XBee behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XbeeSerialInfo {
    pub port_info: SerialPortInfo,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl XbeeSerialInfo {
    pub fn port_name(&self) -> &str {
        &self.port_info.port_name
    }
}

/// This function finds all serial ports that could be XBee radios,
/// returning a vector of XbeeSerialInfo structs.
pub fn discover_xbee_ports() -> Result<Vec<XbeeSerialInfo>, DeviceError> {
    // Get all available serial ports
    let ports = serialport::available_ports()?;

    Ok(filter_xbee_ports(ports))
}

/// Keeps the USB ports with the FTDI vendor id.
pub fn filter_xbee_ports(ports: Vec<SerialPortInfo>) -> Vec<XbeeSerialInfo> {
    // Create a vector of all xbee ports
    let mut xbee_ports: Vec<XbeeSerialInfo> = Vec::new();

    // Iterate over all available ports
    for port in ports {
        // Only USB adapters are discoverable. Radios wired to a UART
        // (such as /dev/ttyS0) have to be named explicitly.
        let usb_info = match port.port_type.clone() {
            serialport::SerialPortType::UsbPort(info) => info,
            _ => continue,
        };

        // If it does not have the FTDI vendor id, skip it.
        if usb_info.vid != FTDI_USB_VID {
            continue;
        }

        xbee_ports.push(XbeeSerialInfo {
            port_info: port,
            product: usb_info.product,
            serial_number: usb_info.serial_number,
        });
    }

    // Return the vector of discovered ports
    xbee_ports
}
