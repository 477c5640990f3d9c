use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::{parse_args, run, Args};

use super::{Env, Stream};

/// The time a [`FakeEnv`] reports unless told otherwise: 2024-01-01.
pub const FAKE_NOW: u64 = 1_704_067_200;

//------------ FakeCmd -------------------------------------------------------

/// A command line to run against the real code in a [`FakeEnv`].
///
/// A `FakeCmd` is a template: [`FakeCmd::args`], [`FakeCmd::cwd`] and
/// [`FakeCmd::now`] return modified copies, so one base command can be
/// reused for a whole test.
#[derive(Clone, Debug)]
pub struct FakeCmd {
    /// `argv`, starting with the program name.
    argv: Vec<OsString>,

    /// Directory relative paths are resolved against.
    cwd: Option<PathBuf>,

    /// Seconds since the epoch the clock shows.
    now: u64,
}

impl FakeCmd {
    pub fn new<S: Into<OsString>>(argv: impl IntoIterator<Item = S>) -> Self {
        FakeCmd {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            now: FAKE_NOW,
        }
    }

    /// A copy running in the given directory.
    pub fn cwd(&self, path: impl AsRef<Path>) -> Self {
        let mut res = self.clone();
        res.cwd = Some(path.as_ref().into());
        res
    }

    /// A copy whose clock shows `secs`.
    pub fn now(&self, secs: u64) -> Self {
        let mut res = self.clone();
        res.now = secs;
        res
    }

    /// A copy with more arguments appended.
    ///
    /// ```rust,ignore
    /// let kasp = FakeCmd::new(["kasp", "-c", "kasp.json"]);
    /// kasp.args(["zone", "list"]).run();  // kasp -c kasp.json zone list
    /// kasp.args(["enforce"]).run();       // kasp -c kasp.json enforce
    /// ```
    pub fn args<S: Into<OsString>>(&self, args: impl IntoIterator<Item = S>) -> Self {
        let mut res = self.clone();
        res.argv.extend(args.into_iter().map(Into::into));
        res
    }

    /// Only parse the command line.
    pub fn parse(&self) -> Result<Args, Error> {
        parse_args(FakeEnv::new(self.clone()))
    }

    /// Run the command and collect what it printed.
    pub fn run(&self) -> FakeResult {
        let env = FakeEnv::new(self.clone());
        let exit_code = run(&env);
        FakeResult {
            exit_code,
            stdout: env.stdout.to_string(),
            stderr: env.stderr.to_string(),
        }
    }
}

//------------ FakeResult ----------------------------------------------------

/// Exit code and output of a [`FakeCmd`].
#[derive(Debug)]
pub struct FakeResult {
    pub exit_code: u8,
    pub stdout: String,
    pub stderr: String,
}

//------------ FakeEnv -------------------------------------------------------

/// An environment with captured output, a fixed clock and a fake cwd.
pub struct FakeEnv {
    pub cmd: FakeCmd,
    pub stdout: FakeStream,
    pub stderr: FakeStream,
}

impl FakeEnv {
    pub fn new(cmd: FakeCmd) -> Self {
        FakeEnv {
            cmd,
            stdout: FakeStream::default(),
            stderr: FakeStream::default(),
        }
    }
}

impl Env for FakeEnv {
    fn args_os(&self) -> impl Iterator<Item = OsString> {
        self.cmd.argv.iter().cloned()
    }

    fn stdout(&self) -> Stream<impl io::Write> {
        Stream::new(self.stdout.clone(), false)
    }

    fn stderr(&self) -> Stream<impl io::Write + Send + Sync + 'static> {
        Stream::new(self.stderr.clone(), false)
    }

    fn in_cwd<'a>(&self, path: &'a impl AsRef<Path>) -> Cow<'a, Path> {
        match &self.cmd.cwd {
            Some(cwd) => Cow::Owned(cwd.join(path)),
            None => Cow::Borrowed(path.as_ref()),
        }
    }

    fn seconds_since_epoch(&self) -> u64 {
        self.cmd.now
    }
}

//------------ FakeStream ----------------------------------------------------

/// A shared in-memory buffer standing in for stdout or stderr.
#[derive(Clone, Default)]
pub struct FakeStream(Arc<Mutex<Vec<u8>>>);

impl io::Write for FakeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("poisoned buffer"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Display for FakeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buf = self.0.lock().map_err(|_| fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}
