/*!
Byte transport interface.

The chip is reached through two primitive operations: send bytes to a header
address, and receive bytes from a header address. Real hardware bindings and
the [`SimulatedDevice`](crate::sim::SimulatedDevice) both implement this
interface; the choice is made once when a [`Chip`](crate::chip::Chip) is built.
*/

use crate::error::Result;

/// Two-function transport used by all register I/O
pub trait Transport {
    /// Send `payload` to `header`, returning the number of payload bytes accepted
    fn write(&mut self, header: u8, payload: &[u8]) -> Result<usize>;

    /// Receive `len` bytes from `header`
    fn read(&mut self, header: u8, len: usize) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, header: u8, payload: &[u8]) -> Result<usize> {
        (**self).write(header, payload)
    }

    fn read(&mut self, header: u8, len: usize) -> Result<Vec<u8>> {
        (**self).read(header, len)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, header: u8, payload: &[u8]) -> Result<usize> {
        (**self).write(header, payload)
    }

    fn read(&mut self, header: u8, len: usize) -> Result<Vec<u8>> {
        (**self).read(header, len)
    }
}

/// Transport backed by two injected functions, e.g. an I2C adapter binding
pub struct FnTransport<W, R> {
    write_fn: W,
    read_fn: R,
}

impl<W, R> FnTransport<W, R>
where
    W: FnMut(u8, &[u8]) -> Result<usize>,
    R: FnMut(u8, usize) -> Result<Vec<u8>>,
{
    /// Wrap a write function and a read function
    pub fn new(write_fn: W, read_fn: R) -> Self {
        Self { write_fn, read_fn }
    }
}

impl<W, R> Transport for FnTransport<W, R>
where
    W: FnMut(u8, &[u8]) -> Result<usize>,
    R: FnMut(u8, usize) -> Result<Vec<u8>>,
{
    fn write(&mut self, header: u8, payload: &[u8]) -> Result<usize> {
        (self.write_fn)(header, payload)
    }

    fn read(&mut self, header: u8, len: usize) -> Result<Vec<u8>> {
        (self.read_fn)(header, len)
    }
}
