//! Bounds-checked big-endian reader and writer
//!
//! Every TLV, vendor payload and WSC attribute is decoded through [`WireReader`] so
//! malformed input surfaces as a `TlvError::Truncated` instead of a panic.

use std::net::Ipv4Addr;

use crate::errors::TlvError;
use crate::types::MacAddress;

/// Cursor over a received byte buffer
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], TlvError> {
        if self.remaining() < len {
            return Err(TlvError::Truncated {
                expected: self.offset + len,
                actual: self.data.len(),
            });
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], TlvError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, TlvError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, TlvError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool, TlvError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, TlvError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, TlvError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, TlvError> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_mac(&mut self) -> Result<MacAddress, TlvError> {
        Ok(MacAddress::new(self.read_array()?))
    }

    pub fn read_ipv4(&mut self) -> Result<Ipv4Addr, TlvError> {
        Ok(Ipv4Addr::from(self.read_array::<4>()?))
    }

    /// Length-prefixed (u8) UTF-8 string
    pub fn read_string(&mut self) -> Result<String, TlvError> {
        let len = self.read_u8()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| TlvError::from("invalid UTF-8 string"))
    }

    /// Length-prefixed (u8) list of bytes
    pub fn read_u8_list(&mut self) -> Result<Vec<u8>, TlvError> {
        let len = self.read_u8()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Length-prefixed (u8) list of MAC addresses
    pub fn read_mac_list(&mut self) -> Result<Vec<MacAddress>, TlvError> {
        let count = self.read_u8()? as usize;
        (0..count).map(|_| self.read_mac()).collect()
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.offset..];
        self.offset = self.data.len();
        rest
    }
}

/// Growable big-endian output buffer
#[derive(Debug, Clone, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_i8(&mut self, value: i8) -> &mut Self {
        self.put_u8(value as u8)
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(value as u8)
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.put_bytes(&value.to_be_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.put_bytes(&value.to_be_bytes())
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.put_bytes(&value.to_be_bytes())
    }

    pub fn put_mac(&mut self, mac: &MacAddress) -> &mut Self {
        self.put_bytes(mac.as_bytes())
    }

    pub fn put_ipv4(&mut self, addr: &Ipv4Addr) -> &mut Self {
        self.put_bytes(&addr.octets())
    }

    /// Strings longer than 255 bytes are truncated on a character boundary
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        let mut end = value.len().min(u8::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.put_u8(end as u8);
        self.put_bytes(&value.as_bytes()[..end])
    }

    pub fn put_u8_list(&mut self, values: &[u8]) -> &mut Self {
        let len = values.len().min(u8::MAX as usize);
        self.put_u8(len as u8);
        self.put_bytes(&values[..len])
    }

    pub fn put_mac_list(&mut self, macs: &[MacAddress]) -> &mut Self {
        let count = macs.len().min(u8::MAX as usize);
        self.put_u8(count as u8);
        for mac in &macs[..count] {
            self.put_mac(mac);
        }
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_bounds() {
        let data = [0x01, 0x02, 0x03];
        let mut reader = WireReader::new(&data);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert!(reader.read_u16().is_err());
        assert_eq!(reader.read_u8().unwrap(), 0x03);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_string_and_lists() {
        let mut writer = WireWriter::new();
        writer
            .put_string("prplMesh")
            .put_u8_list(&[36, 40])
            .put_mac_list(&[MacAddress::new([1, 2, 3, 4, 5, 6])]);
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_string().unwrap(), "prplMesh");
        assert_eq!(reader.read_u8_list().unwrap(), vec![36, 40]);
        assert_eq!(reader.read_mac_list().unwrap().len(), 1);
        assert!(reader.is_empty());
    }
}
