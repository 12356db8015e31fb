//! System I/O for the simulator's syscall services.
//!
//! [`SystemIO`] owns the simulated program's file descriptor table and its
//! console streams. Descriptors 0, 1, and 2 are bound to the host's stdin,
//! stdout, and stderr; descriptors from 3 upward are handed out by the
//! `open` service and reclaimed by [`SystemIO::reset_files`].
//!
//! Console input can be redirected to an in-memory buffer with
//! [`SystemIO::with_input`], which the tests use to script interactive
//! programs.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, Read, Write};

/// Open-for-reading flag value for the `open` syscall.
pub const OPEN_READ: i32 = 0;
/// Open-for-writing (create/truncate) flag value for the `open` syscall.
pub const OPEN_WRITE: i32 = 1;
/// Open-for-appending flag value for the `open` syscall.
pub const OPEN_APPEND: i32 = 9;

const FIRST_USER_DESCRIPTOR: i32 = 3;

/// Where console reads come from.
enum InputSource {
    Stdin,
    Buffer(std::io::Cursor<Vec<u8>>),
}

impl std::fmt::Debug for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputSource::Stdin => f.write_str("Stdin"),
            InputSource::Buffer(_) => f.write_str("Buffer"),
        }
    }
}

/// Where console writes go.
enum OutputSink {
    Stdout,
    Buffer(Vec<u8>),
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputSink::Stdout => f.write_str("Stdout"),
            OutputSink::Buffer(_) => f.write_str("Buffer"),
        }
    }
}

/// The simulated program's I/O: console streams plus the open file table.
#[derive(Debug)]
pub struct SystemIO {
    input: InputSource,
    output: OutputSink,
    files: HashMap<i32, File>,
    next_descriptor: i32,
}

impl SystemIO {
    /// Creates a SystemIO bound to the host's console.
    pub fn new() -> Self {
        Self {
            input: InputSource::Stdin,
            output: OutputSink::Stdout,
            files: HashMap::new(),
            next_descriptor: FIRST_USER_DESCRIPTOR,
        }
    }

    /// Creates a SystemIO whose console input is the given bytes and whose
    /// console output is captured in memory.
    pub fn with_input(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: InputSource::Buffer(std::io::Cursor::new(input.into())),
            output: OutputSink::Buffer(Vec::new()),
            files: HashMap::new(),
            next_descriptor: FIRST_USER_DESCRIPTOR,
        }
    }

    /// The console output captured so far, if output is buffered.
    pub fn captured_output(&self) -> Option<&[u8]> {
        match &self.output {
            OutputSink::Buffer(bytes) => Some(bytes),
            OutputSink::Stdout => None,
        }
    }

    /// Writes text to the console.
    pub fn print_string(&mut self, text: &str) {
        match &mut self.output {
            OutputSink::Stdout => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                let _ = lock.write_all(text.as_bytes());
                let _ = lock.flush();
            }
            OutputSink::Buffer(bytes) => bytes.extend_from_slice(text.as_bytes()),
        }
    }

    /// Reads one line from the console, including the trailing newline when
    /// present. Returns an empty string at end of input.
    pub fn read_line(&mut self) -> String {
        let mut line = String::new();
        match &mut self.input {
            InputSource::Stdin => {
                let _ = std::io::stdin().lock().read_line(&mut line);
            }
            InputSource::Buffer(cursor) => {
                let mut bytes = Vec::new();
                let _ = cursor.read_until(b'\n', &mut bytes);
                line = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        line
    }

    /// Reads an integer from the next console line, trimming whitespace.
    pub fn read_integer(&mut self) -> Option<i32> {
        crate::bits::decode_integer(self.read_line().trim())
    }

    /// Reads a real number from the next console line.
    pub fn read_double(&mut self) -> Option<f64> {
        self.read_line().trim().parse().ok()
    }

    /// Reads one character from the console.
    pub fn read_char(&mut self) -> Option<char> {
        let mut byte = [0u8; 1];
        let count = match &mut self.input {
            InputSource::Stdin => std::io::stdin().lock().read(&mut byte).ok()?,
            InputSource::Buffer(cursor) => cursor.read(&mut byte).ok()?,
        };
        (count == 1).then(|| char::from(byte[0]))
    }

    /// Opens a file for the simulated program, returning a descriptor or -1.
    ///
    /// The flag values follow the syscall contract: 0 read, 1 write
    /// (create/truncate), 9 append.
    pub fn open_file(&mut self, path: &str, flags: i32) -> i32 {
        let result = match flags {
            OPEN_READ => OpenOptions::new().read(true).open(path),
            OPEN_WRITE => OpenOptions::new().write(true).create(true).truncate(true).open(path),
            OPEN_APPEND => OpenOptions::new().append(true).create(true).open(path),
            _ => return -1,
        };
        match result {
            Ok(file) => {
                let descriptor = self.next_descriptor;
                self.next_descriptor += 1;
                self.files.insert(descriptor, file);
                descriptor
            }
            Err(_) => -1,
        }
    }

    /// Reads up to `buffer.len()` bytes from a descriptor. Returns the byte
    /// count, 0 at end of file, or -1 on a bad descriptor or error.
    pub fn read_from_descriptor(&mut self, descriptor: i32, buffer: &mut [u8]) -> i32 {
        match descriptor {
            0 => {
                let count = match &mut self.input {
                    InputSource::Stdin => std::io::stdin().lock().read(buffer),
                    InputSource::Buffer(cursor) => cursor.read(buffer),
                };
                count.map(|n| n as i32).unwrap_or(-1)
            }
            _ => match self.files.get_mut(&descriptor) {
                Some(file) => file.read(buffer).map(|n| n as i32).unwrap_or(-1),
                None => -1,
            },
        }
    }

    /// Writes bytes to a descriptor. Returns the byte count or -1.
    pub fn write_to_descriptor(&mut self, descriptor: i32, buffer: &[u8]) -> i32 {
        match descriptor {
            1 => {
                self.print_string(&String::from_utf8_lossy(buffer));
                buffer.len() as i32
            }
            2 => {
                let _ = std::io::stderr().lock().write_all(buffer);
                buffer.len() as i32
            }
            _ => match self.files.get_mut(&descriptor) {
                Some(file) => file.write(buffer).map(|n| n as i32).unwrap_or(-1),
                None => -1,
            },
        }
    }

    /// Closes a user descriptor. Closing the console descriptors is ignored.
    pub fn close_descriptor(&mut self, descriptor: i32) {
        self.files.remove(&descriptor);
    }

    /// Closes every user file descriptor and resets descriptor numbering.
    pub fn reset_files(&mut self) {
        self.files.clear();
        self.next_descriptor = FIRST_USER_DESCRIPTOR;
    }
}

impl Default for SystemIO {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_console_roundtrip() {
        let mut io = SystemIO::with_input("42\nx\n");
        io.print_string("hello ");
        io.print_string("world");
        assert_eq!(io.captured_output().unwrap(), b"hello world");
        assert_eq!(io.read_integer(), Some(42));
        assert_eq!(io.read_char(), Some('x'));
    }

    #[test]
    fn test_read_integer_rejects_garbage() {
        let mut io = SystemIO::with_input("carrot\n");
        assert_eq!(io.read_integer(), None);
    }

    #[test]
    fn test_file_descriptor_lifecycle() {
        let dir = std::env::temp_dir().join("mips_ensemble_io_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.txt");
        let path_str = path.to_string_lossy().into_owned();

        let mut io = SystemIO::with_input("");
        let fd = io.open_file(&path_str, OPEN_WRITE);
        assert!(fd >= 3);
        assert_eq!(io.write_to_descriptor(fd, b"data"), 4);
        io.close_descriptor(fd);

        let fd = io.open_file(&path_str, OPEN_READ);
        let mut buffer = [0u8; 16];
        let count = io.read_from_descriptor(fd, &mut buffer);
        assert_eq!(&buffer[..count as usize], b"data");

        io.reset_files();
        assert_eq!(io.read_from_descriptor(fd, &mut buffer), -1);
        // Descriptor numbering restarts after reset.
        assert_eq!(io.open_file(&path_str, OPEN_READ), 3);
    }

    #[test]
    fn test_bad_descriptor() {
        let mut io = SystemIO::with_input("");
        assert_eq!(io.read_from_descriptor(42, &mut [0u8; 4]), -1);
        assert_eq!(io.write_to_descriptor(42, b"x"), -1);
        assert_eq!(io.open_file("/nonexistent/nope", OPEN_READ), -1);
    }
}
