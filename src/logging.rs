// Logging - env_logger setup
//
// Console output always; optional copy into <log_dir>/<app>.log. Each line
// carries the source file and line of the call site. Write failures on
// either sink are dropped, logging never fails the engine.

use crate::config::Config;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Initialize logging once. Later calls are ignored.
///
/// Info by default; `RUST_LOG` overrides it.
pub fn init(config: &Config, app_name: &str) {
    let file = if config.debug.log_to_file {
        open_log_file(Path::new(&config.debug.log_dir), app_name)
    } else {
        None
    };

    if builder(Env::default(), file).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

fn builder(env: Env<'_>, file: Option<File>) -> Builder {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info).parse_env(env);

    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{} {:<5} {}:{}] {}",
            buf.timestamp_millis(),
            record.level(),
            record.file().unwrap_or("?"),
            record.line().unwrap_or(0),
            record.args()
        )
    });

    builder.target(Target::Pipe(Box::new(Tee { file })));
    builder
}

/// Path of the log file for `app_name` inside `dir`
pub fn log_file_path(dir: &Path, app_name: &str) -> PathBuf {
    let stem: String = app_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{}.log", stem))
}

// Create/clear the log file and write the header
fn open_log_file(dir: &Path, app_name: &str) -> Option<File> {
    if fs::create_dir_all(dir).is_err() {
        return None;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_file_path(dir, app_name))
        .ok()?;

    let _ = writeln!(file, "=== {} Log ===", app_name);
    let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
    let _ = writeln!(file);
    Some(file)
}

/// Console + file sink
struct Tee {
    file: Option<File>,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stderr().write_all(buf);
        if let Some(file) = self.file.as_mut() {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        Ok(())
    }
}
