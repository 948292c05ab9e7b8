//! Build dispatcher: worker pool для сборки тайлов
//!
//! Фиксированный пул OS-потоков, job'ы раздаются round robin. Результаты
//! стекаются в общий канал и выгребаются driving thread'ом — воркеры store
//! не трогают. Submit — fire-and-forget: вызывающий поток никогда не ждёт
//! сборку, отмены нет, store применяет что пришло (с generation-фильтром).
//!
//! Если поток поднять не удалось (ограниченный host), диспетчер деградирует
//! в cooperative режим: очередь job'ов выполняется на driving thread
//! маленькими порциями за кадр. Внешний контракт тот же — асинхронное
//! завершение, никакой блокировки тика.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;

use bevy::prelude::*;

use crate::builder::{build_tile, BuildJob, TileBuildResult};
use crate::logger::{log_error, log_warning};

/// Бюджет cooperative-режима: сколько job'ов строим на driving thread за кадр
const DEFERRED_BUILDS_PER_FRAME: usize = 2;

struct Worker {
    job_tx: Sender<BuildJob>,
    handle: JoinHandle<()>,
    /// Счётчик назначенных job'ов (детерминированный, для fairness-статистики)
    assigned: u64,
}

enum DispatchMode {
    Threaded { workers: Vec<Worker> },
    Deferred { queue: VecDeque<BuildJob> },
}

#[derive(Resource)]
pub struct BuildDispatcher {
    mode: DispatchMode,
    round_robin: usize,
    submitted: u64,
    completed: u64,
    /// Generation-счётчик: штампуется в job при submit
    generation: u64,
    results_tx: Sender<TileBuildResult>,
    results_rx: Mutex<Receiver<TileBuildResult>>,
}

impl BuildDispatcher {
    /// Поднимает пул из `worker_count` потоков. При невозможности спавна
    /// деградирует в cooperative режим вместо провала инициализации
    pub fn new(worker_count: usize) -> Self {
        let (results_tx, results_rx) = mpsc::channel();

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let (job_tx, job_rx) = mpsc::channel::<BuildJob>();
            let worker_results = results_tx.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("navmesh-worker-{}", i))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        let result = build_tile(&job);
                        if worker_results.send(result).is_err() {
                            // Движок демонтирован — выходим
                            break;
                        }
                    }
                });

            match spawned {
                Ok(handle) => workers.push(Worker {
                    job_tx,
                    handle,
                    assigned: 0,
                }),
                Err(e) => {
                    log_warning(&format!(
                        "Failed to spawn navmesh worker {}: {} — остаток пула не поднимаем",
                        i, e
                    ));
                    break;
                }
            }
        }

        let mode = if workers.is_empty() {
            log_warning("No navmesh workers available, falling back to deferred builds");
            DispatchMode::Deferred {
                queue: VecDeque::new(),
            }
        } else {
            DispatchMode::Threaded { workers }
        };

        Self {
            mode,
            round_robin: 0,
            submitted: 0,
            completed: 0,
            generation: 0,
            results_tx,
            results_rx: Mutex::new(results_rx),
        }
    }

    /// Cooperative режим без потоков (используется и в тестах)
    pub fn deferred() -> Self {
        let (results_tx, results_rx) = mpsc::channel();
        Self {
            mode: DispatchMode::Deferred {
                queue: VecDeque::new(),
            },
            round_robin: 0,
            submitted: 0,
            completed: 0,
            generation: 0,
            results_tx,
            results_rx: Mutex::new(results_rx),
        }
    }

    /// Следующая generation для job'а (штампуется при submit)
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Ставит job следующему воркеру по кругу. Синхронный вызов, завершение
    /// асинхронное; порядок прихода результатов не гарантирован
    pub fn submit(&mut self, job: BuildJob) {
        self.submitted += 1;

        match &mut self.mode {
            DispatchMode::Threaded { workers } => {
                let index = self.round_robin;
                self.round_robin = (self.round_robin + 1) % workers.len();

                let worker = &mut workers[index];
                worker.assigned += 1;
                if worker.job_tx.send(job).is_err() {
                    log_error(&format!("navmesh worker {} недоступен, job потерян", index));
                }
            }
            DispatchMode::Deferred { queue } => {
                queue.push_back(job);
            }
        }
    }

    /// Выгребает готовые результаты. В cooperative режиме сначала строит
    /// небольшую порцию отложенных job'ов прямо здесь
    pub fn drain_results(&mut self) -> Vec<TileBuildResult> {
        let mut results = Vec::new();

        if let DispatchMode::Deferred { queue } = &mut self.mode {
            for _ in 0..DEFERRED_BUILDS_PER_FRAME {
                let Some(job) = queue.pop_front() else { break };
                results.push(build_tile(&job));
            }
        }

        match self.results_rx.lock() {
            Ok(rx) => {
                while let Ok(result) = rx.try_recv() {
                    results.push(result);
                }
            }
            Err(e) => log_error(&format!("navmesh results channel poisoned: {}", e)),
        }

        self.completed += results.len() as u64;
        results
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn worker_count(&self) -> usize {
        match &self.mode {
            DispatchMode::Threaded { workers } => workers.len(),
            DispatchMode::Deferred { .. } => 0,
        }
    }

    /// Сколько job'ов назначено каждому воркеру
    pub fn worker_loads(&self) -> Vec<u64> {
        match &self.mode {
            DispatchMode::Threaded { workers } => workers.iter().map(|w| w.assigned).collect(),
            DispatchMode::Deferred { .. } => Vec::new(),
        }
    }
}

impl Drop for BuildDispatcher {
    fn drop(&mut self) {
        // Закрываем job-каналы и дожидаемся воркеров
        if let DispatchMode::Threaded { workers } =
            std::mem::replace(&mut self.mode, DispatchMode::Deferred { queue: VecDeque::new() })
        {
            for worker in workers {
                drop(worker.job_tx);
                let _ = worker.handle.join();
            }
        }
    }
}
