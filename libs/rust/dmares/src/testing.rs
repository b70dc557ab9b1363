//! A logger that keeps what each test thread logged.
use std::string::String;
use std::string::ToString;
use std::thread;
use std::thread::ThreadId;
use std::vec::Vec;

struct Capture {
    lines: spin::Mutex<Vec<(ThreadId, log::Level, String)>>,
}

static LOGGER: Capture = Capture {
    lines: spin::Mutex::new(Vec::new()),
};

impl log::Log for Capture {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let line = (thread::current().id(), record.level(), record.args().to_string());
        self.lines.lock().push(line);
    }

    fn flush(&self) {}
}

/// Installs the logger. Safe to call from every test.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Trace);
    }
}

/// Drains the lines the current thread logged.
pub fn take_logs() -> Vec<(log::Level, String)> {
    let me = thread::current().id();
    let mut lines = LOGGER.lines.lock();
    let (mine, others): (Vec<_>, Vec<_>) = lines.drain(..).partition(|(id, _, _)| *id == me);
    *lines = others;
    mine.into_iter().map(|(_, level, msg)| (level, msg)).collect()
}
