//! Static USB descriptors for the FIDO HID function.
//!
//! One interface, one interrupt IN and one interrupt OUT endpoint,
//! 64-byte reports, 5 ms polling. The report descriptor lives on the
//! FIDO Alliance usage page (0xF1D0), usage 0x01 (U2F authenticator),
//! which is what browsers and platforms enumerate FIDO devices by.

/// Test VID/PID pair; replace per product at build time.
pub const VENDOR_ID: u16 = 0xcafe;
pub const PRODUCT_ID: u16 = 0x4000;

pub const STRING_MANUFACTURER: &str = "OpenSource";
pub const STRING_PRODUCT: &str = "FIDO2 Token";
pub const STRING_SERIAL: &str = "123456";

/// Device descriptor (USB 2.0, class defined at interface level).
pub const DEVICE: [u8; 18] = [
    18,   // bLength
    0x01, // bDescriptorType: device
    0x00, 0x02, // bcdUSB 2.00
    0x00, // bDeviceClass
    0x00, // bDeviceSubClass
    0x00, // bDeviceProtocol
    64,   // bMaxPacketSize0
    0xfe, 0xca, // idVendor
    0x00, 0x40, // idProduct
    0x00, 0x01, // bcdDevice 1.00
    0x01, // iManufacturer
    0x02, // iProduct
    0x03, // iSerialNumber
    0x01, // bNumConfigurations
];

/// Configuration descriptor with the HID interface, HID class
/// descriptor and both interrupt endpoints inlined.
pub const CONFIGURATION: [u8; 41] = [
    // configuration
    9,    // bLength
    0x02, // bDescriptorType: configuration
    41, 0, // wTotalLength
    1,    // bNumInterfaces
    1,    // bConfigurationValue
    0,    // iConfiguration
    0xa0, // bmAttributes: bus-powered, remote wakeup
    50,   // bMaxPower: 100 mA
    // interface
    9,    // bLength
    0x04, // bDescriptorType: interface
    0,    // bInterfaceNumber
    0,    // bAlternateSetting
    2,    // bNumEndpoints
    0x03, // bInterfaceClass: HID
    0,    // bInterfaceSubClass
    0,    // bInterfaceProtocol
    0,    // iInterface
    // HID
    9,    // bLength
    0x21, // bDescriptorType: HID
    0x11, 0x01, // bcdHID 1.11
    0,    // bCountryCode
    1,    // bNumDescriptors
    0x22, // bDescriptorType: report
    34, 0, // wDescriptorLength
    // endpoint IN
    7,    // bLength
    0x05, // bDescriptorType: endpoint
    0x81, // bEndpointAddress: EP1 IN
    0x03, // bmAttributes: interrupt
    64, 0, // wMaxPacketSize
    5,    // bInterval: 5 ms
    // endpoint OUT
    7,    // bLength
    0x05, // bDescriptorType: endpoint
    0x01, // bEndpointAddress: EP1 OUT
    0x03, // bmAttributes: interrupt
    64, 0, // wMaxPacketSize
    5,    // bInterval: 5 ms
];

/// HID report descriptor: raw 64-byte input and output reports on the
/// FIDO usage page.
pub const HID_REPORT: [u8; 34] = [
    0x06, 0xd0, 0xf1, // Usage Page (FIDO Alliance)
    0x09, 0x01, //       Usage (U2F Authenticator Device)
    0xa1, 0x01, //       Collection (Application)
    0x09, 0x20, //         Usage (Input Report Data)
    0x15, 0x00, //         Logical Minimum (0)
    0x26, 0xff, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //         Report Size (8)
    0x95, 0x40, //         Report Count (64)
    0x81, 0x02, //         Input (Data, Var, Abs)
    0x09, 0x21, //         Usage (Output Report Data)
    0x15, 0x00, //         Logical Minimum (0)
    0x26, 0xff, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //         Report Size (8)
    0x95, 0x40, //         Report Count (64)
    0x91, 0x02, //         Output (Data, Var, Abs)
    0xc0, //             End Collection
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_descriptor_identifiers() {
        assert_eq!(DEVICE[0] as usize, DEVICE.len());
        assert_eq!(u16::from_le_bytes([DEVICE[8], DEVICE[9]]), VENDOR_ID);
        assert_eq!(u16::from_le_bytes([DEVICE[10], DEVICE[11]]), PRODUCT_ID);
    }

    #[test]
    fn configuration_lengths_are_consistent() {
        assert_eq!(
            u16::from_le_bytes([CONFIGURATION[2], CONFIGURATION[3]]) as usize,
            CONFIGURATION.len()
        );
        // the HID class descriptor announces the report descriptor size
        assert_eq!(
            u16::from_le_bytes([CONFIGURATION[25], CONFIGURATION[26]]) as usize,
            HID_REPORT.len()
        );
    }

    #[test]
    fn fido_usage_page() {
        assert_eq!(&HID_REPORT[..3], &[0x06, 0xd0, 0xf1]);
        assert_eq!(&HID_REPORT[3..5], &[0x09, 0x01]);
    }

    #[test]
    fn interrupt_endpoints_use_64_byte_packets() {
        // endpoint descriptors sit at the tail
        let ep_in = &CONFIGURATION[27..34];
        let ep_out = &CONFIGURATION[34..];
        assert_eq!(ep_in[2], 0x81);
        assert_eq!(ep_out[2], 0x01);
        for ep in [ep_in, ep_out] {
            assert_eq!(ep[3], 0x03);
            assert_eq!(u16::from_le_bytes([ep[4], ep[5]]), 64);
            assert_eq!(ep[6], 5);
        }
    }
}
