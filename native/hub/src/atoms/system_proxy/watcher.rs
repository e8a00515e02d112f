// 网络配置变化监听：防抖后重新枚举网络服务，服务列表变化时重新应用期望状态。
//
// 状态流转：Idle -> Observing -> Debouncing -> Reconciling -> Observing，
// 显式停止后进入 Stopped。

use super::backend::WatchSpec;
use super::error::{ProxyError, Result};
use super::manager::ProxyManager;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Observing,
    Debouncing { deadline: Instant },
    Reconciling,
    Stopped,
}

// 防抖状态机，不涉及任何 I/O
pub struct DebounceMachine {
    spec: WatchSpec,
    delay: Duration,
    state: WatchState,
}

impl DebounceMachine {
    pub fn new(spec: WatchSpec, delay: Duration) -> Self {
        Self {
            spec,
            delay,
            state: WatchState::Idle,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn start(&mut self) {
        if self.state == WatchState::Idle {
            self.state = WatchState::Observing;
        }
    }

    // 只有白名单内的文件会推进状态；防抖期间的新事件重置计时器
    pub fn on_event(&mut self, path: &Path, now: Instant) -> bool {
        if !self.spec.matches(path) {
            return false;
        }

        match self.state {
            WatchState::Observing | WatchState::Debouncing { .. } => {
                self.state = WatchState::Debouncing {
                    deadline: now + self.delay,
                };
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            WatchState::Debouncing { deadline } => Some(deadline),
            _ => None,
        }
    }

    // 计时器到期则进入 Reconciling
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            WatchState::Debouncing { deadline } if now >= deadline => {
                self.state = WatchState::Reconciling;
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self) {
        if self.state == WatchState::Reconciling {
            self.state = WatchState::Observing;
        }
    }

    pub fn stop(&mut self) {
        self.state = WatchState::Stopped;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    // 服务列表未变化，无副作用
    Unchanged,
    // 列表变化但没有已启用的期望状态
    NothingToApply,
    Reapplied,
    Failed,
}

// 对比前后两次枚举的服务集合，变化时重新应用
pub struct Reconciler {
    manager: Arc<ProxyManager>,
    known: BTreeSet<String>,
}

impl Reconciler {
    pub fn new(manager: Arc<ProxyManager>) -> Self {
        let known = match manager.backend().list_targets() {
            Ok(targets) => targets.into_iter().collect(),
            Err(e) => {
                log::warn!("初始网络服务检测失败：{}", e);
                BTreeSet::new()
            }
        };

        Self { manager, known }
    }

    // 后台自愈：失败只记录日志，不向外传播
    pub fn reconcile(&mut self) -> ReconcileOutcome {
        let current: BTreeSet<String> = match self.manager.backend().list_targets() {
            Ok(targets) => targets.into_iter().collect(),
            Err(e) => {
                log::error!("重新检测网络服务失败：{}", e);
                return ReconcileOutcome::Failed;
            }
        };

        if current == self.known {
            log::info!("网络服务列表未变化，跳过代理恢复");
            return ReconcileOutcome::Unchanged;
        }

        log::info!("网络服务列表已变化：{:?} -> {:?}", self.known, current);
        self.known = current;

        match self.manager.reapply_desired() {
            None => ReconcileOutcome::NothingToApply,
            Some(Ok(_)) => {
                log::info!("代理设置已自动恢复");
                ReconcileOutcome::Reapplied
            }
            Some(Err(e)) => {
                log::error!("重新应用代理设置失败：{}", e);
                ReconcileOutcome::Failed
            }
        }
    }
}

pub struct ChangeWatcher {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    // 持有文件系统订阅，drop 时关闭
    _subscription: Option<RecommendedWatcher>,
}

impl ChangeWatcher {
    // 为支持监听的后端启动后台任务；后端不支持时返回 None。需在 tokio 运行时内调用
    pub fn start(manager: Arc<ProxyManager>, delay: Duration) -> Result<Option<Self>> {
        let Some(spec) = manager.backend().watch_spec() else {
            log::debug!("后端 {} 不支持网络变化监听", manager.backend().name());
            return Ok(None);
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut subscription = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if is_content_change(&event.kind) {
                        for path in event.paths {
                            let _ = event_tx.send(path);
                        }
                    }
                }
                Err(e) => log::error!("网络监听错误：{}", e),
            },
            Config::default(),
        )
        .map_err(|e| ProxyError::Watch(format!("创建文件监听器失败：{}", e)))?;

        subscription
            .watch(&spec.dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ProxyError::Watch(format!("添加监听路径 {} 失败：{}", spec.dir.display(), e))
            })?;

        Ok(Some(Self::spawn(
            manager,
            spec,
            delay,
            event_rx,
            Some(subscription),
        )))
    }

    pub(crate) fn spawn(
        manager: Arc<ProxyManager>,
        spec: WatchSpec,
        delay: Duration,
        events: mpsc::UnboundedReceiver<PathBuf>,
        subscription: Option<RecommendedWatcher>,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let machine = DebounceMachine::new(spec, delay);

        let handle = tokio::spawn(async move {
            // 初始服务列表在后台线程中枚举
            let reconciler =
                match tokio::task::spawn_blocking(move || Reconciler::new(manager)).await {
                    Ok(reconciler) => reconciler,
                    Err(e) => {
                        log::error!("初始化网络监听失败：{}", e);
                        return;
                    }
                };
            watch_loop(machine, reconciler, events, stop_rx).await;
        });

        Self {
            stop_tx,
            handle,
            _subscription: subscription,
        }
    }

    // 停止监听并等待后台任务退出；消耗 self，只能调用一次
    pub async fn stop(self) {
        let Self {
            stop_tx,
            handle,
            _subscription: subscription,
        } = self;

        drop(subscription);
        let _ = stop_tx.send(());
        if let Err(e) = handle.await {
            log::error!("网络监听任务退出异常：{}", e);
        }
    }
}

// 只关心新建和内容写入，仅元数据变化（如 touch）不触发
fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn watch_loop(
    mut machine: DebounceMachine,
    reconciler: Reconciler,
    mut events: mpsc::UnboundedReceiver<PathBuf>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let reconciler = Arc::new(Mutex::new(reconciler));
    machine.start();
    log::info!("已启动网络配置监听：{}", machine.spec.dir.display());

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            event = events.recv() => match event {
                Some(path) => {
                    if machine.on_event(&path, Instant::now()) {
                        log::debug!("网络配置文件变化：{}", path.display());
                    }
                }
                None => break,
            },
            _ = sleep_until(machine.deadline()) => {
                if !machine.poll(Instant::now()) {
                    continue;
                }

                log::info!("检测到网络配置变化");
                let reconciler = reconciler.clone();
                let result = tokio::task::spawn_blocking(move || {
                    reconciler
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .reconcile()
                })
                .await;

                if let Err(e) = result {
                    log::error!("代理恢复任务执行失败：{}", e);
                }
                machine.finish();
            }
        }
    }

    machine.stop();
    log::info!("停止网络监听");
}
