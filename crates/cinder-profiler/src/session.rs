use std::borrow::Cow;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use crate::alloc::{self, AllocSnapshot};
use crate::{ProfileEvent, ProfileReport, ProfilerError};

/// What a profiling session records besides CPU time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProfilerConfig {
    pub profile_memory: bool,
    pub record_shapes: bool,
}

impl ProfilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile_memory(mut self, profile_memory: bool) -> Self {
        self.profile_memory = profile_memory;
        self
    }

    pub fn with_record_shapes(mut self, record_shapes: bool) -> Self {
        self.record_shapes = record_shapes;
        self
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<Recorder>> = const { RefCell::new(None) };
}

struct Frame {
    name: Cow<'static, str>,
    input_shapes: Vec<Vec<usize>>,
    start: Instant,
    alloc: AllocSnapshot,
    children_time: Duration,
    children_memory: i64,
}

struct Recorder {
    config: ProfilerConfig,
    started: Instant,
    stack: Vec<Frame>,
    events: Vec<ProfileEvent>,
}

impl Recorder {
    fn enter(&mut self, name: Cow<'static, str>, input_shapes: Vec<Vec<usize>>) {
        self.stack.push(Frame {
            name,
            input_shapes,
            start: Instant::now(),
            alloc: AllocSnapshot::default(),
            children_time: Duration::ZERO,
            children_memory: 0,
        });

        // Taken last so the frame bookkeeping itself is not charged to the scope.
        if let Some(frame) = self.stack.last_mut() {
            frame.alloc = alloc::snapshot();
            frame.start = Instant::now();
        }
    }

    fn exit(&mut self) {
        let end = Instant::now();
        let end_alloc = alloc::snapshot();

        let Some(frame) = self.stack.pop() else {
            return;
        };

        let cpu_time = end.saturating_duration_since(frame.start);
        let cpu_memory = if self.config.profile_memory {
            end_alloc.net_since(&frame.alloc)
        } else {
            0
        };

        if let Some(parent) = self.stack.last_mut() {
            parent.children_time += cpu_time;
            parent.children_memory += cpu_memory;
        }

        self.events.push(ProfileEvent {
            name: frame.name.into_owned(),
            input_shapes: frame.input_shapes,
            start: frame.start.saturating_duration_since(self.started),
            depth: self.stack.len(),
            cpu_time,
            self_cpu_time: cpu_time.saturating_sub(frame.children_time),
            cpu_memory,
            self_cpu_memory: cpu_memory - frame.children_memory,
        });
    }
}

/// Entry point of the profiler.
pub struct Profiler;

impl Profiler {
    /// Starts recording the scopes opened on the current thread.
    ///
    /// Only one session can be active per thread.
    pub fn start(config: ProfilerConfig) -> Result<ProfilerSession, ProfilerError> {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if active.is_some() {
                return Err(ProfilerError::AlreadyActive);
            }

            if config.profile_memory && !alloc::is_tracking() {
                log::warn!(
                    "Memory profiling requested but no tracking allocator is installed, \
                     memory columns will be zero"
                );
            }

            *active = Some(Recorder {
                config,
                started: Instant::now(),
                stack: Vec::new(),
                events: Vec::new(),
            });
            Ok(ProfilerSession {
                config,
                not_send: PhantomData,
            })
        })
    }

    /// Whether a session is recording on the current thread.
    pub fn is_active() -> bool {
        ACTIVE.with(|active| active.borrow().is_some())
    }
}

/// A running profiling session, bound to the thread that started it.
///
/// Dropping the session without calling [finish](ProfilerSession::finish) discards
/// what was recorded.
pub struct ProfilerSession {
    config: ProfilerConfig,
    not_send: PhantomData<*const ()>,
}

impl ProfilerSession {
    pub fn config(&self) -> ProfilerConfig {
        self.config
    }

    /// Stops recording and returns every closed scope, in closing order.
    pub fn finish(self) -> ProfileReport {
        let recorder = ACTIVE.with(|active| active.borrow_mut().take());

        match recorder {
            Some(recorder) => {
                if !recorder.stack.is_empty() {
                    log::warn!(
                        "{} profiling scopes were still open when the session finished",
                        recorder.stack.len()
                    );
                }
                ProfileReport::new(recorder.events, recorder.config, recorder.started.elapsed())
            }
            None => ProfileReport::new(Vec::new(), self.config, Duration::ZERO),
        }
    }
}

impl Drop for ProfilerSession {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            if let Ok(mut active) = active.try_borrow_mut() {
                active.take();
            }
        });
    }
}

/// Guard of a profiled scope; the scope closes when the guard is dropped.
#[must_use = "the scope closes as soon as the guard is dropped"]
pub struct RecordFunction {
    active: bool,
    not_send: PhantomData<*const ()>,
}

impl Drop for RecordFunction {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        ACTIVE.with(|active| {
            if let Some(recorder) = active.borrow_mut().as_mut() {
                recorder.exit();
            }
        });
    }
}

/// Opens a profiled scope named `name`.
///
/// Does nothing when no session is active on the current thread.
pub fn record_function(name: impl Into<Cow<'static, str>>) -> RecordFunction {
    record_function_with_shapes(name, Vec::new)
}

/// Opens a profiled scope and attaches the shapes of its inputs.
///
/// `shapes` is only called when the active session records shapes.
pub fn record_function_with_shapes<F>(
    name: impl Into<Cow<'static, str>>,
    shapes: F,
) -> RecordFunction
where
    F: FnOnce() -> Vec<Vec<usize>>,
{
    let record_shapes = ACTIVE.with(|active| {
        active
            .borrow()
            .as_ref()
            .map(|recorder| recorder.config.record_shapes)
    });
    let Some(record_shapes) = record_shapes else {
        return RecordFunction {
            active: false,
            not_send: PhantomData,
        };
    };

    let input_shapes = if record_shapes { shapes() } else { Vec::new() };
    let active = ACTIVE.with(|active| match active.borrow_mut().as_mut() {
        Some(recorder) => {
            recorder.enter(name.into(), input_shapes);
            true
        }
        None => false,
    });

    RecordFunction {
        active,
        not_send: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy(duration: Duration) {
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }

    #[test]
    fn scopes_without_session_are_inert() {
        let _guard = record_function("idle");

        assert!(!Profiler::is_active());
    }

    #[test]
    fn second_session_on_same_thread_is_rejected() {
        let session = Profiler::start(ProfilerConfig::new()).unwrap();

        assert!(matches!(
            Profiler::start(ProfilerConfig::new()),
            Err(ProfilerError::AlreadyActive)
        ));

        drop(session);
        assert!(!Profiler::is_active());
    }

    #[test]
    fn nested_scopes_split_self_time() {
        let session = Profiler::start(ProfilerConfig::new()).unwrap();
        {
            let _outer = record_function("outer");
            busy(Duration::from_millis(2));
            {
                let _inner = record_function("inner");
                busy(Duration::from_millis(5));
            }
        }
        let report = session.finish();

        let events = report.events();
        assert_eq!(events.len(), 2);
        let (inner, outer) = (&events[0], &events[1]);
        assert_eq!(inner.name, "inner");
        assert_eq!(inner.depth, 1);
        assert_eq!(outer.name, "outer");
        assert_eq!(outer.depth, 0);
        assert!(outer.cpu_time >= inner.cpu_time);
        assert_eq!(outer.self_cpu_time, outer.cpu_time - inner.cpu_time);
        assert!(inner.self_cpu_time >= Duration::from_millis(5));
    }

    #[test]
    fn shapes_are_recorded_on_demand() {
        let config = ProfilerConfig::new().with_record_shapes(true);
        let session = Profiler::start(config).unwrap();
        drop(record_function_with_shapes("matmul", || vec![vec![2, 3], vec![3, 4]]));
        let report = session.finish();

        assert_eq!(report.events()[0].input_shapes, vec![vec![2, 3], vec![3, 4]]);

        let session = Profiler::start(ProfilerConfig::new()).unwrap();
        drop(record_function_with_shapes("matmul", || {
            panic!("shapes must not be computed when they are not recorded")
        }));
        assert!(session.finish().events()[0].input_shapes.is_empty());
    }

    #[test]
    fn memory_is_attributed_to_the_allocating_scope() {
        let config = ProfilerConfig::new().with_profile_memory(true);
        let session = Profiler::start(config).unwrap();
        let kept = {
            let _outer = record_function("outer");
            let _inner = record_function("alloc");
            vec![7u8; 32 << 20]
        };
        let report = session.finish();
        drop(kept);

        let alloc = &report.events()[0];
        let outer = &report.events()[1];
        assert_eq!(alloc.name, "alloc");
        assert!(alloc.self_cpu_memory >= 16 << 20);
        assert_eq!(outer.name, "outer");
    }
}
