//! Turns the enabled part of a [`SystemGraph`] into tasks and runs them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};
use tracing::debug;

use super::{FaultPhase, Signal, System, SystemError, SystemFault, SystemGraph, SystemId, SystemKind};
use super::runner::{Completion, SerialRunner, TaskRunner};
use super::task::{TaskGraph, TaskHandle};
use crate::error::LockstepError;
use crate::frame_state::FrameState;
use crate::telemetry::{report_to_observer, SpecViolation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::Config;

/// Schedules and runs a sealed system graph.
///
/// Execution happens on the calling thread, task by task, in the order the
/// [`TaskRunner`] hands them out ([`SerialRunner`] unless replaced).
/// A failing system yields a [`SystemFault`]; the remaining tasks still run.
pub struct SystemScheduler<T: Config> {
    graph: SystemGraph<T>,
    tasks: TaskGraph,
    runner: Box<dyn TaskRunner>,
    completion: Completion,
    observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Config> SystemScheduler<T> {
    /// Seals `graph` and wraps it.
    #[must_use]
    pub fn new(mut graph: SystemGraph<T>) -> Self {
        graph.seal();
        Self {
            graph,
            tasks: TaskGraph::new(),
            runner: Box::new(SerialRunner::new()),
            completion: Completion::default(),
            observer: None,
        }
    }

    /// Replaces the task runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Box<dyn TaskRunner>) -> Self {
        self.set_runner(runner);
        self
    }

    /// Replaces the task runner.
    pub fn set_runner(&mut self, runner: Box<dyn TaskRunner>) {
        self.runner = runner;
    }

    /// Routes system faults to `observer` instead of the tracing fallback.
    pub fn set_violation_observer(&mut self, observer: Option<Arc<dyn ViolationObserver>>) {
        self.observer = observer;
    }

    /// The sealed graph.
    #[must_use]
    pub const fn graph(&self) -> &SystemGraph<T> {
        &self.graph
    }

    /// Tasks of the most recent [`Self::run_tick`].
    #[must_use]
    pub const fn last_tasks(&self) -> &TaskGraph {
        &self.tasks
    }

    /// Applies each system's start state to `frame`.
    pub fn init_frame(&self, frame: &mut FrameState<T>) -> Result<(), LockstepError> {
        self.graph.init_frame(frame)
    }

    /// Appends tasks for every enabled root, chained after `handle`.
    ///
    /// A disabled system hides its whole subtree. Returns the handle of the
    /// last task appended, or `handle` if nothing was scheduled.
    pub fn schedule(&self, frame: &FrameState<T>, tasks: &mut TaskGraph, handle: TaskHandle) -> TaskHandle {
        self.graph
            .roots()
            .iter()
            .fold(handle, |after, root| self.schedule_node(*root, frame, tasks, after))
    }

    fn schedule_node(
        &self,
        id: SystemId,
        frame: &FrameState<T>,
        tasks: &mut TaskGraph,
        after: TaskHandle,
    ) -> TaskHandle {
        if !frame.is_system_enabled(id) {
            return after;
        }
        match self.graph.kind(id) {
            Some(SystemKind::MainThread) => {
                let mut systems = smallvec![id];
                self.collect_enabled_descendants(id, frame, &mut systems);
                tasks.push(systems, true, after)
            },
            Some(SystemKind::Group) => {
                let own = tasks.push(smallvec![id], false, after);
                self.graph
                    .children(id)
                    .iter()
                    .fold(own, |prev, child| self.schedule_node(*child, frame, tasks, prev))
            },
            Some(SystemKind::Leaf) => tasks.push(smallvec![id], false, after),
            None => after,
        }
    }

    fn collect_enabled_descendants(
        &self,
        id: SystemId,
        frame: &FrameState<T>,
        out: &mut SmallVec<[SystemId; 4]>,
    ) {
        for child in self.graph.children(id) {
            if frame.is_system_enabled(*child) {
                out.push(*child);
                self.collect_enabled_descendants(*child, frame, out);
            }
        }
    }

    /// Runs every task of `tasks` against `frame` in the runner's order.
    ///
    /// Polling stops at the first handle that is unknown, already run, or
    /// waiting on a task that has not run. Whatever the runner left out then
    /// runs in chain order, so every task runs exactly once after its dependency.
    pub fn run(&mut self, tasks: &TaskGraph, frame: &mut FrameState<T>) -> Vec<SystemFault> {
        let mut faults = Vec::new();
        let mut done = std::mem::take(&mut self.completion);
        done.reset(tasks.len());
        self.runner.schedule(tasks);
        while let Some(handle) = self.runner.poll() {
            if !done.is_ready(tasks, handle) {
                self.report_runner(frame, format!("task runner handed out {:?} out of order", handle));
                break;
            }
            self.run_task(tasks, handle, frame, &mut faults);
            done.mark(handle);
        }
        let mut skipped = 0_usize;
        for index in 0..tasks.len() {
            let handle = TaskHandle::at(index);
            if !done.is_done(handle) {
                self.run_task(tasks, handle, frame, &mut faults);
                done.mark(handle);
                skipped += 1;
            }
        }
        if skipped > 0 {
            self.report_runner(frame, format!("task runner skipped {} task(s); ran them in chain order", skipped));
        }
        self.completion = done;
        faults
    }

    fn run_task(
        &self,
        tasks: &TaskGraph,
        handle: TaskHandle,
        frame: &mut FrameState<T>,
        faults: &mut Vec<SystemFault>,
    ) {
        let Some(task) = handle.index().and_then(|i| tasks.tasks().get(i)) else {
            return;
        };
        for id in &task.systems {
            faults.extend(self.invoke(*id, FaultPhase::Update, frame, |s, f| s.update(f)));
        }
    }

    fn report_runner(&self, frame: &FrameState<T>, message: String) {
        let violation = SpecViolation::new(
            ViolationSeverity::Warning,
            ViolationKind::SystemFault,
            message,
            concat!(file!(), ":", line!()),
        )
        .with_frame(frame.tick());
        report_to_observer(self.observer.as_ref(), &violation);
    }

    /// Schedules and runs one tick, then delivers enable/disable callbacks
    /// for the toggles the tick queued.
    pub fn run_tick(&mut self, frame: &mut FrameState<T>) -> Vec<SystemFault> {
        let mut tasks = std::mem::take(&mut self.tasks);
        tasks.clear();
        self.schedule(frame, &mut tasks, TaskHandle::NONE);
        let mut faults = self.run(&tasks, frame);
        faults.extend(self.dispatch_toggles(frame));
        self.tasks = tasks;
        faults
    }

    /// Calls `on_enabled`/`on_disabled` for toggles queued on `frame`.
    pub fn dispatch_toggles(&self, frame: &mut FrameState<T>) -> Vec<SystemFault> {
        let mut faults = Vec::new();
        for (id, enabled) in frame.take_toggles() {
            let fault = if enabled {
                self.invoke(id, FaultPhase::Enabled, frame, |s, f| s.on_enabled(f))
            } else {
                self.invoke(id, FaultPhase::Disabled, frame, |s, f| s.on_disabled(f))
            };
            faults.extend(fault);
        }
        faults
    }

    /// Delivers `signal` to every active system registered for it.
    pub fn dispatch_signal(&self, signal: &Signal, frame: &mut FrameState<T>) -> Vec<SystemFault> {
        let kind = signal.kind();
        let mut faults = Vec::new();
        for id in self.graph.signal_table(kind) {
            if !self.graph.is_active(*id, frame) {
                continue;
            }
            faults.extend(self.invoke(*id, FaultPhase::Signal(kind), frame, |s, f| {
                s.on_signal(signal, f)
            }));
        }
        debug!(?signal, faults = faults.len(), "dispatched signal");
        faults
    }

    fn invoke<F>(
        &self,
        id: SystemId,
        phase: FaultPhase,
        frame: &mut FrameState<T>,
        call: F,
    ) -> Option<SystemFault>
    where
        F: FnOnce(&dyn System<T>, &mut FrameState<T>) -> Result<(), SystemError>,
    {
        let system = self.graph.system(id)?;
        let tick = frame.tick();
        let (message, panicked) = match catch_unwind(AssertUnwindSafe(|| call(system, frame))) {
            Ok(Ok(())) => return None,
            Ok(Err(err)) => (err.to_string(), false),
            Err(payload) => (panic_message(payload.as_ref()), true),
        };
        let fault = SystemFault {
            system: id,
            name: system.name().to_owned(),
            tick,
            phase,
            message,
            panicked,
        };
        let violation = SpecViolation::new(
            ViolationSeverity::Error,
            ViolationKind::SystemFault,
            fault.to_string(),
            concat!(file!(), ":", line!()),
        )
        .with_frame(tick)
        .with_context("system", fault.name.as_str())
        .with_context("panicked", fault.panicked.to_string());
        report_to_observer(self.observer.as_ref(), &violation);
        Some(fault)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

impl<T: Config> std::fmt::Debug for SystemScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemScheduler")
            .field("graph", &self.graph)
            .field("last_tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::error::SystemIndexReason;
    use crate::telemetry::CollectingObserver;
    use crate::frame_state::ComponentSchema;
    use crate::systems::{SignalKind, SignalSet};
    use crate::{Frame, SimulationEvent};

    /// Globals record which systems ran, in order.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Trace {
        log: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Hash)]
    struct NoEvent;

    impl SimulationEvent for NoEvent {
        fn event_type(&self) -> u32 {
            0
        }
    }

    struct TestConfig;

    impl Config for TestConfig {
        type Input = u8;
        type Globals = Trace;
        type PlayerData = ();
        type Event = NoEvent;
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Ok,
        Fail,
        Panic,
    }

    struct Scripted {
        name: &'static str,
        kind: SystemKind,
        start_enabled: bool,
        behavior: Behavior,
        signals: SignalSet,
    }

    impl Scripted {
        fn leaf(name: &'static str) -> Self {
            Self {
                name,
                kind: SystemKind::Leaf,
                start_enabled: true,
                behavior: Behavior::Ok,
                signals: SignalSet::EMPTY,
            }
        }

        fn kind(mut self, kind: SystemKind) -> Self {
            self.kind = kind;
            self
        }

        fn behavior(mut self, behavior: Behavior) -> Self {
            self.behavior = behavior;
            self
        }

        fn disabled(mut self) -> Self {
            self.start_enabled = false;
            self
        }

        fn signals(mut self, signals: SignalSet) -> Self {
            self.signals = signals;
            self
        }

        fn act(&self, frame: &mut FrameState<TestConfig>, what: &str) -> Result<(), SystemError> {
            frame.globals_mut().log.push(format!("{}:{}", what, self.name));
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => Err(SystemError::new(format!("{} refused", self.name))),
                Behavior::Panic => panic!("{} exploded", self.name),
            }
        }
    }

    impl System<TestConfig> for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> SystemKind {
            self.kind
        }

        fn start_enabled(&self) -> bool {
            self.start_enabled
        }

        fn signals(&self) -> SignalSet {
            self.signals
        }

        fn update(&self, frame: &mut FrameState<TestConfig>) -> Result<(), SystemError> {
            self.act(frame, "update")
        }

        fn on_enabled(&self, frame: &mut FrameState<TestConfig>) -> Result<(), SystemError> {
            self.act(frame, "enabled")
        }

        fn on_disabled(&self, frame: &mut FrameState<TestConfig>) -> Result<(), SystemError> {
            self.act(frame, "disabled")
        }

        fn on_signal(&self, _signal: &Signal, frame: &mut FrameState<TestConfig>) -> Result<(), SystemError> {
            self.act(frame, "signal")
        }
    }

    fn frame_for(scheduler: &SystemScheduler<TestConfig>) -> FrameState<TestConfig> {
        let mut frame =
            FrameState::new(ComponentSchema::empty(), scheduler.graph().len(), 1).unwrap();
        scheduler.init_frame(&mut frame).unwrap();
        frame
    }

    fn log(frame: &FrameState<TestConfig>) -> Vec<&str> {
        frame.globals().log.iter().map(String::as_str).collect()
    }

    // ==========================================
    // Graph registration
    // ==========================================

    #[test]
    fn indices_follow_registration_order() {
        let mut graph = SystemGraph::<TestConfig>::new();
        let a = graph.add_root(Scripted::leaf("a")).unwrap();
        let g = graph
            .add_root(Scripted::leaf("g").kind(SystemKind::Group))
            .unwrap();
        let c = graph.add_child(g, Scripted::leaf("c")).unwrap();
        assert_eq!((a.index(), g.index(), c.index()), (0, 1, 2));
        assert_eq!(graph.parent(c), Some(g));
        assert_eq!(graph.find("c"), Some(c));
        assert_eq!(graph.children(g), &[c]);
    }

    #[test]
    fn registration_errors() {
        let mut graph = SystemGraph::<TestConfig>::new();
        let leaf = graph.add_root(Scripted::leaf("leaf")).unwrap();
        assert_eq!(
            graph.add_child(leaf, Scripted::leaf("x")).unwrap_err(),
            LockstepError::SystemIndex {
                reason: SystemIndexReason::NotAGroup { parent: 0 }
            }
        );
        assert!(matches!(
            graph.add_root(Scripted::leaf("leaf")).unwrap_err(),
            LockstepError::SystemIndex {
                reason: SystemIndexReason::DuplicateName { .. }
            }
        ));
        assert!(graph.add_child(SystemId::new(9), Scripted::leaf("y")).is_err());
    }

    #[test]
    fn sealed_graph_rejects_new_systems() {
        let mut graph = SystemGraph::<TestConfig>::new();
        graph.add_root(Scripted::leaf("a")).unwrap();
        graph.seal();
        assert_eq!(
            graph.add_root(Scripted::leaf("b")).unwrap_err(),
            LockstepError::SystemIndex {
                reason: SystemIndexReason::GraphSealed
            }
        );
    }

    #[test]
    fn too_many_systems_is_an_error() {
        let mut graph = SystemGraph::<TestConfig>::new();
        let names: Vec<&'static str> = (0..257)
            .map(|i| &*Box::leak(format!("s{i}").into_boxed_str()))
            .collect();
        for name in &names[..256] {
            graph.add_root(Scripted::leaf(name)).unwrap();
        }
        assert!(matches!(
            graph.add_root(Scripted::leaf(names[256])).unwrap_err(),
            LockstepError::SystemIndex {
                reason: SystemIndexReason::TooManySystems { .. }
            }
        ));
    }

    // ==========================================
    // Scheduling
    // ==========================================

    #[test]
    fn group_children_run_in_declaration_order() {
        let mut graph = SystemGraph::<TestConfig>::new();
        let g = graph
            .add_root(Scripted::leaf("group").kind(SystemKind::Group))
            .unwrap();
        graph.add_child(g, Scripted::leaf("zeta")).unwrap();
        graph.add_child(g, Scripted::leaf("alpha")).unwrap();
        graph.add_root(Scripted::leaf("tail")).unwrap();
        let mut scheduler = SystemScheduler::new(graph);
        let mut frame = frame_for(&scheduler);

        let faults = scheduler.run_tick(&mut frame);
        assert!(faults.is_empty());
        assert_eq!(
            log(&frame),
            vec!["update:group", "update:zeta", "update:alpha", "update:tail"]
        );
        let tasks = scheduler.last_tasks().tasks();
        assert_eq!(tasks.len(), 4);
        for (i, task) in tasks.iter().enumerate().skip(1) {
            assert_eq!(task.depends_on.index(), Some(i - 1));
        }
    }

    #[test]
    fn disabled_group_hides_subtree() {
        let mut graph = SystemGraph::<TestConfig>::new();
        let g = graph
            .add_root(Scripted::leaf("group").kind(SystemKind::Group).disabled())
            .unwrap();
        graph.add_child(g, Scripted::leaf("child")).unwrap();
        graph.add_root(Scripted::leaf("other")).unwrap();
        let mut scheduler = SystemScheduler::new(graph);
        let mut frame = frame_for(&scheduler);
        scheduler.run_tick(&mut frame);
        assert_eq!(log(&frame), vec!["update:other"]);
    }

    #[test]
    fn main_thread_system_collapses_descendants() {
        let mut graph = SystemGraph::<TestConfig>::new();
        let m = graph
            .add_root(Scripted::leaf("main").kind(SystemKind::MainThread))
            .unwrap();
        graph.add_child(m, Scripted::leaf("ui")).unwrap();
        graph.add_child(m, Scripted::leaf("off").disabled()).unwrap();
        graph.add_root(Scripted::leaf("after")).unwrap();
        let scheduler = SystemScheduler::new(graph);
        let frame = frame_for(&scheduler);

        let mut tasks = TaskGraph::new();
        let last = scheduler.schedule(&frame, &mut tasks, TaskHandle::NONE);
        assert_eq!(tasks.len(), 2);
        assert!(tasks.tasks()[0].main_thread);
        assert_eq!(
            tasks.tasks()[0].systems.as_slice(),
            &[SystemId::new(0), SystemId::new(1)]
        );
        assert_eq!(last.index(), Some(1));
    }

    #[test]
    fn disabling_takes_effect_next_tick_and_fires_callbacks() {
        struct Disabler;
        impl System<TestConfig> for Disabler {
            fn name(&self) -> &str {
                "disabler"
            }
            fn update(&self, frame: &mut FrameState<TestConfig>) -> Result<(), SystemError> {
                frame
                    .set_system_enabled(SystemId::new(1), false)
                    .map(|_| ())
                    .map_err(|e| SystemError::new(e.to_string()))
            }
        }
        let mut graph = SystemGraph::<TestConfig>::new();
        graph.add_root(Disabler).unwrap();
        graph.add_root(Scripted::leaf("victim")).unwrap();
        let mut scheduler = SystemScheduler::new(graph);
        let mut frame = frame_for(&scheduler);

        scheduler.run_tick(&mut frame);
        assert_eq!(log(&frame), vec!["update:victim", "disabled:victim"]);
        frame.globals_mut().log.clear();
        scheduler.run_tick(&mut frame);
        assert!(log(&frame).is_empty());
    }

    // ==========================================
    // Task runners
    // ==========================================

    /// Hands tasks out in chain order and records what it saw.
    struct RecordingRunner {
        seen: Arc<Mutex<Vec<(usize, bool, Option<usize>)>>>,
        pending: VecDeque<TaskHandle>,
    }

    impl TaskRunner for RecordingRunner {
        fn schedule(&mut self, tasks: &TaskGraph) {
            let mut seen = self.seen.lock();
            self.pending.clear();
            for (index, task) in tasks.tasks().iter().enumerate() {
                seen.push((index, task.main_thread, task.depends_on.index()));
                self.pending.push_back(TaskHandle::at(index));
            }
        }

        fn poll(&mut self) -> Option<TaskHandle> {
            self.pending.pop_front()
        }
    }

    /// Hands out the last task first.
    struct BackwardsRunner {
        pending: Vec<TaskHandle>,
    }

    impl TaskRunner for BackwardsRunner {
        fn schedule(&mut self, tasks: &TaskGraph) {
            self.pending = (0..tasks.len()).map(TaskHandle::at).collect();
        }

        fn poll(&mut self) -> Option<TaskHandle> {
            self.pending.pop()
        }
    }

    fn main_thread_graph() -> SystemGraph<TestConfig> {
        let mut graph = SystemGraph::<TestConfig>::new();
        graph.add_root(Scripted::leaf("input")).unwrap();
        let m = graph
            .add_root(Scripted::leaf("render").kind(SystemKind::MainThread))
            .unwrap();
        graph.add_child(m, Scripted::leaf("hud")).unwrap();
        graph.add_root(Scripted::leaf("physics")).unwrap();
        graph
    }

    #[test]
    fn custom_runner_sees_main_thread_tasks_in_chain_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = SystemScheduler::new(main_thread_graph()).with_runner(Box::new(RecordingRunner {
            seen: seen.clone(),
            pending: VecDeque::new(),
        }));
        let mut frame = frame_for(&scheduler);

        let faults = scheduler.run_tick(&mut frame);
        assert!(faults.is_empty());
        assert_eq!(
            *seen.lock(),
            vec![(0, false, None), (1, true, Some(0)), (2, false, Some(1))]
        );
        assert_eq!(
            log(&frame),
            vec!["update:input", "update:render", "update:hud", "update:physics"]
        );
    }

    #[test]
    fn out_of_order_runner_is_reported_and_chain_order_wins() {
        let observer = Arc::new(CollectingObserver::new());
        let mut scheduler = SystemScheduler::new(main_thread_graph())
            .with_runner(Box::new(BackwardsRunner { pending: Vec::new() }));
        scheduler.set_violation_observer(Some(observer.clone()));
        let mut frame = frame_for(&scheduler);

        let faults = scheduler.run_tick(&mut frame);
        assert!(faults.is_empty());
        assert_eq!(
            log(&frame),
            vec!["update:input", "update:render", "update:hud", "update:physics"]
        );
        let reports = observer.violations_of_kind(ViolationKind::SystemFault);
        assert_eq!(reports.len(), 2);
        assert!(reports[0].message.contains("out of order"));
        assert!(reports[1].message.contains("skipped 3"));
    }

    // ==========================================
    // Fault isolation
    // ==========================================

    #[test]
    fn failing_and_panicking_systems_do_not_stop_the_tick() {
        let mut graph = SystemGraph::<TestConfig>::new();
        graph
            .add_root(Scripted::leaf("bad").behavior(Behavior::Fail))
            .unwrap();
        graph
            .add_root(Scripted::leaf("worse").behavior(Behavior::Panic))
            .unwrap();
        graph.add_root(Scripted::leaf("fine")).unwrap();
        let mut scheduler = SystemScheduler::new(graph);
        let observer = Arc::new(CollectingObserver::new());
        scheduler.set_violation_observer(Some(observer.clone()));
        let mut frame = frame_for(&scheduler);
        frame.set_tick(Frame::new(4));

        let faults = scheduler.run_tick(&mut frame);
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0].name, "bad");
        assert!(!faults[0].panicked);
        assert_eq!(faults[1].name, "worse");
        assert!(faults[1].panicked);
        assert!(faults[1].message.contains("exploded"));
        assert_eq!(faults[1].tick, Frame::new(4));
        assert_eq!(log(&frame).last(), Some(&"update:fine"));
        assert_eq!(observer.violations_of_kind(ViolationKind::SystemFault).len(), 2);
    }

    #[test]
    fn toggle_callback_faults_are_contained() {
        let mut graph = SystemGraph::<TestConfig>::new();
        graph
            .add_root(Scripted::leaf("fragile").behavior(Behavior::Panic).disabled())
            .unwrap();
        let scheduler = SystemScheduler::new(graph);
        let mut frame = frame_for(&scheduler);
        frame.set_system_enabled(SystemId::new(0), true).unwrap();
        let faults = scheduler.dispatch_toggles(&mut frame);
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].phase, FaultPhase::Enabled);
    }

    // ==========================================
    // Signals
    // ==========================================

    #[test]
    fn signals_reach_only_registered_active_systems() {
        let started = SignalSet::EMPTY.with(SignalKind::GameStarted);
        let mut graph = SystemGraph::<TestConfig>::new();
        let g = graph
            .add_root(Scripted::leaf("group").kind(SystemKind::Group).signals(started))
            .unwrap();
        graph
            .add_child(g, Scripted::leaf("listener").signals(started))
            .unwrap();
        graph.add_root(Scripted::leaf("deaf")).unwrap();
        graph
            .add_root(Scripted::leaf("sleeping").signals(started).disabled())
            .unwrap();
        let scheduler = SystemScheduler::new(graph);
        let mut frame = frame_for(&scheduler);

        assert_eq!(scheduler.graph().signal_table(SignalKind::GameStarted).len(), 3);
        let faults = scheduler.dispatch_signal(&Signal::GameStarted, &mut frame);
        assert!(faults.is_empty());
        assert_eq!(log(&frame), vec!["signal:group", "signal:listener"]);
    }

    #[test]
    fn init_frame_rejects_mismatched_frame() {
        let mut graph = SystemGraph::<TestConfig>::new();
        graph.add_root(Scripted::leaf("a")).unwrap();
        let scheduler = SystemScheduler::new(graph);
        let mut frame = FrameState::<TestConfig>::new(ComponentSchema::empty(), 2, 1).unwrap();
        assert!(scheduler.init_frame(&mut frame).is_err());
    }
}
