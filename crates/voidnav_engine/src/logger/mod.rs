//! Глобальный logger движка
//!
//! Навигационный движок живёт внутри чужого host-приложения (game client,
//! headless сервер), поэтому вывод идёт через подключаемый `LogPrinter`:
//! host ставит свой принтер, по умолчанию — консоль.

use once_cell::sync::Lazy;
use std::sync::Mutex;

static LOGGER: Lazy<Mutex<LoggerState>> = Lazy::new(|| {
    Mutex::new(LoggerState {
        printer: None,
        level: LogLevel::Debug,
    })
});

struct LoggerState {
    printer: Option<Box<dyn LogPrinter>>,
    level: LogLevel,
}

/// Уровни логирования (фильтрация по минимальному уровню)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

pub trait LogPrinter: Send + Sync {
    fn print(&self, level: LogLevel, message: &str);
}

/// Ставит printer, если host ещё не поставил свой
pub fn init_logger() {
    let mut state = LOGGER.lock().unwrap();
    if state.printer.is_none() {
        state.printer = Some(Box::new(ConsoleLogger));
    }
}

pub fn set_logger(printer: Box<dyn LogPrinter>) {
    LOGGER.lock().unwrap().printer = Some(printer);
}

pub fn set_log_level(level: LogLevel) {
    LOGGER.lock().unwrap().level = level;
}

pub fn log(message: &str) {
    log_with_level(LogLevel::Debug, message);
}

pub fn log_info(message: &str) {
    log_with_level(LogLevel::Info, message);
}

pub fn log_warning(message: &str) {
    log_with_level(LogLevel::Warning, message);
}

pub fn log_error(message: &str) {
    log_with_level(LogLevel::Error, message);
}

pub fn log_with_level(level: LogLevel, message: &str) {
    // Timestamp добавляем здесь, а не в принтере — одинаковый формат для всех host'ов
    let state = LOGGER.lock().unwrap();
    if level < state.level {
        return;
    }
    if let Some(printer) = state.printer.as_ref() {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        printer.print(level, &format!("[{}] {}", timestamp, message));
    }
}

pub struct ConsoleLogger;

impl LogPrinter for ConsoleLogger {
    fn print(&self, level: LogLevel, message: &str) {
        println!("[{}] {}", level.as_str(), message);
    }
}
