//! authenticatorGetInfo (0x04).

use crate::cbor::Writer;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Options {
    /// Resident keys. This device is stateless, so never.
    pub rk: bool,
    /// User presence via the button.
    pub up: bool,
    /// Platform-attached authenticator.
    pub plat: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    // 0x01
    pub versions: &'static [&'static str],
    // 0x02
    pub extensions: &'static [&'static str],
    // 0x03
    pub aaguid: [u8; 16],
    // 0x04
    pub options: Options,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            versions: &["U2F_V2", "FIDO_2_0"],
            extensions: &[],
            aaguid: super::AAGUID,
            options: Options {
                rk: false,
                up: true,
                plat: false,
            },
        }
    }
}

impl Response {
    pub fn serialize(&self, writer: &mut Writer) {
        writer.map(4);

        writer.unsigned(1);
        writer.array(self.versions.len());
        for version in self.versions {
            writer.text_string(version);
        }

        writer.unsigned(2);
        writer.array(self.extensions.len());
        for extension in self.extensions {
            writer.text_string(extension);
        }

        writer.unsigned(3);
        writer.byte_string(&self.aaguid);

        // option keys in CTAP2 canonical order: length first, then bytewise
        writer.unsigned(4);
        writer.map(3);
        writer.text_string("rk");
        writer.boolean(self.options.rk);
        writer.text_string("up");
        writer.boolean(self.options.up);
        writer.text_string("plat");
        writer.boolean(self.options.plat);
    }
}
