use std::io::{self, Read};

/// Wraps a raw body stream so that dropping intermediate buffering adaptors
/// (a `BufReader`, the multipart decoder's pushback buffer) never closes the
/// underlying socket (§4.1 "Non-closure contract").
///
/// The caller is expected to hand this a *cloned* handle to the connection
/// (e.g. `TcpStream::try_clone`) rather than the original — `ShieldedReader`
/// itself does nothing magic on `Drop`, it just means the value living
/// inside it is never the connection's only owner, so the request pipeline
/// can keep reading trailing multipart bytes off the same socket after the
/// header block has already been handed to something that logically looks
/// like it "finished" with its reader.
pub struct ShieldedReader<R> {
    inner: R,
}

impl<R: Read> ShieldedReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ShieldedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn forwards_reads_to_inner() {
        let mut shielded = ShieldedReader::new(Cursor::new(b"hello world".to_vec()));
        let mut buf = [0u8; 5];
        shielded.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn into_inner_recovers_the_original_reader() {
        let shielded = ShieldedReader::new(Cursor::new(b"abc".to_vec()));
        let mut inner = shielded.into_inner();
        let mut buf = Vec::new();
        inner.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"abc");
    }
}
