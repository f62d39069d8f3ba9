use std::path::Path;
use fnv::{FnvHashMap, FnvHashSet};

pub mod data;
pub mod vrp;
pub mod mobius;
pub mod app;

pub type Map<K, V> = FnvHashMap<K, V>;
pub type Set<T> = FnvHashSet<T>;

mod logging_setup {
    use super::*;
    use tracing_subscriber::{EnvFilter, fmt, registry, prelude::*};
    use tracing_appender::{non_blocking, non_blocking::WorkerGuard};
    use std::fs::OpenOptions;

    fn build_and_set_global_subscriber<P>(logfile: Option<P>, verbose: bool, is_test: bool) -> Option<WorkerGuard> where
        P: AsRef<Path>
    {
        let stderr_log = fmt::layer().with_writer(std::io::stderr);
        let env_filter = if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::from_default_env()
        };
        let r = registry().with(stderr_log).with(env_filter);

        let flush_guard = match logfile {
            Some(p) => {
                let logfile = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(p).unwrap();
                let (writer, _guard) = non_blocking::NonBlockingBuilder::default()
                    .lossy(false)
                    .finish(logfile);
                let json = fmt::layer()
                    .json()
                    .with_span_list(true)
                    .with_current_span(false)
                    .with_writer(writer);

                let r = r.with(json);
                if is_test { r.try_init().ok(); }
                else { r.init(); }
                Some(_guard)
            },
            None => {
                if is_test { r.try_init().ok(); }
                else { r.init(); }
                None
            }
        };
        return flush_guard
    }

    pub fn init_logging(logfile: Option<impl AsRef<Path>>, verbose: bool) -> Option<WorkerGuard> {
        return build_and_set_global_subscriber(logfile, verbose, false);
    }

    #[allow(dead_code)]
    pub fn init_test_logging(logfile: Option<impl AsRef<Path>>) -> Option<WorkerGuard> {
        return build_and_set_global_subscriber(logfile, false, true);
    }
}
pub use logging_setup::*;


#[macro_export]
macro_rules! map (
    { $($key:expr => $value:expr),+ $(,)? } => {
        {
            let mut m = $crate::Map::default();
            $(
                m.insert($key, $value);
            )+
            m
        }
     };
);
