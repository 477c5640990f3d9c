use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::ops::DerefMut;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;

#[cfg(test)]
pub mod fake;

mod real;
pub use real::RealEnv;

pub const RED: u8 = 31;
pub const YELLOW: u8 = 33;

/// The outside world as seen by the program.
///
/// Commands never touch process globals directly, so that they can be run
/// in a fake environment in tests.
pub trait Env {
    /// The command line, starting with the program name.
    fn args_os(&self) -> impl Iterator<Item = OsString>;

    /// Where command output goes.
    fn stdout(&self) -> Stream<impl io::Write>;

    /// Where log lines, warnings and errors go.
    fn stderr(&self) -> Stream<impl io::Write + Send + Sync + 'static>;

    /// Resolve a path relative to the working directory of the program.
    fn in_cwd<'a>(&self, path: &'a impl AsRef<Path>) -> Cow<'a, Path>;

    /// The wall clock. The datastore's fake time takes precedence over it.
    fn seconds_since_epoch(&self) -> u64;
}

/// An output stream of an [`Env`].
///
/// Its `write_fmt` returns nothing, so `writeln!(env.stdout(), ..)` needs
/// neither a `Write` import nor error handling. It also serves as the
/// writer of the log subscriber.
pub struct Stream<T: io::Write> {
    writer: Mutex<T>,
    is_terminal: bool,
}

impl<'writer, T: io::Write + 'writer> MakeWriter<'writer> for Stream<T> {
    type Writer = &'writer Self;

    fn make_writer(&'writer self) -> Self::Writer {
        self
    }
}

impl<T: io::Write> io::Write for &Stream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer
            .lock()
            .map_err(|_| io::Error::other("poisoned stream"))?
            .deref_mut()
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer
            .lock()
            .map_err(|_| io::Error::other("poisoned stream"))?
            .deref_mut()
            .flush()
    }
}

impl<T: io::Write> Stream<T> {
    pub fn new(writer: T, is_terminal: bool) -> Self {
        Stream {
            writer: Mutex::new(writer),
            is_terminal,
        }
    }

    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) {
        // Like `println!`, there is nothing sensible left to do if the
        // terminal is gone. Write errors are dropped.
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.deref_mut().write_fmt(args);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    /// Wrap text in an ANSI colour if the stream is a terminal.
    pub fn colourize<'a>(&self, colour: u8, text: &'a str) -> Cow<'a, str> {
        if self.is_terminal {
            format!("\x1B[{colour}m{text}\x1B[0m").into()
        } else {
            text.into()
        }
    }
}

impl<E: Env> Env for &E {
    fn args_os(&self) -> impl Iterator<Item = OsString> {
        (**self).args_os()
    }

    fn stdout(&self) -> Stream<impl io::Write> {
        (**self).stdout()
    }

    fn stderr(&self) -> Stream<impl io::Write + Send + Sync + 'static> {
        (**self).stderr()
    }

    fn in_cwd<'a>(&self, path: &'a impl AsRef<Path>) -> Cow<'a, Path> {
        (**self).in_cwd(path)
    }

    fn seconds_since_epoch(&self) -> u64 {
        (**self).seconds_since_epoch()
    }
}
