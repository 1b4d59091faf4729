// SPDX-License-Identifier: GPL-3.0

//! Worker pool running [`RuntimeEngine`] calls off the caller's runtime.

use super::{CallOutcome, ExecutionRequest, RuntimeCall, RuntimeEngine};
use crate::{error::ExecutorError, storage::StorageProvider};
use parking_lot::RwLock;
use std::{sync::Arc, thread};
use tokio::sync::{Mutex, mpsc, oneshot};

struct Task {
	request: ExecutionRequest,
	storage: Arc<dyn StorageProvider>,
	reply: oneshot::Sender<Result<CallOutcome, ExecutorError>>,
}

/// A pool of worker threads executing runtime calls.
///
/// Each worker owns a single-threaded tokio runtime and takes tasks from a shared queue.
/// Requests are independent: concurrent requests may run on different workers, the calls
/// inside one request always run in order on one worker. Dropping the service stops the
/// workers once the queue is drained.
pub struct ExecutorService {
	sender: mpsc::UnboundedSender<Task>,
	workers: usize,
}

impl ExecutorService {
	/// Start `workers` worker threads (at least one) driving `engine`.
	pub fn spawn(engine: Arc<dyn RuntimeEngine>, workers: usize) -> Result<Self, ExecutorError> {
		let workers = workers.max(1);
		let (sender, receiver) = mpsc::unbounded_channel::<Task>();
		let receiver = Arc::new(Mutex::new(receiver));

		for index in 0..workers {
			let engine = engine.clone();
			let receiver = receiver.clone();
			thread::Builder::new()
				.name(format!("replay-executor-{index}"))
				.spawn(move || run_worker(index, engine, receiver))
				.map_err(|e| ExecutorError::WorkerSpawn(e.to_string()))?;
		}
		log::debug!("Started {workers} execution worker(s)");

		Ok(Self { sender, workers })
	}

	pub fn workers(&self) -> usize {
		self.workers
	}

	/// Queue a request and wait for its outcome.
	pub async fn execute(
		&self,
		request: ExecutionRequest,
		storage: Arc<dyn StorageProvider>,
	) -> Result<CallOutcome, ExecutorError> {
		let (reply, response) = oneshot::channel();
		self.sender
			.send(Task { request, storage, reply })
			.map_err(|_| ExecutorError::ServiceStopped)?;
		response.await.map_err(|_| ExecutorError::ServiceStopped)?
	}
}

fn run_worker(
	index: usize,
	engine: Arc<dyn RuntimeEngine>,
	receiver: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
) {
	let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(e) => {
			log::error!("Execution worker {index} failed to start its runtime: {e}");
			return;
		},
	};
	runtime.block_on(async move {
		loop {
			let task = receiver.lock().await.recv().await;
			let Some(Task { request, storage, reply }) = task else {
				break;
			};
			let result = engine.execute(&request, storage).await;
			if let Err(e) = &result {
				log::debug!("Execution failed on worker {index}: {e}");
			}
			// The caller may have given up waiting.
			let _ = reply.send(result);
		}
	});
	log::trace!("Execution worker {index} stopped");
}

/// Options applied to every request sent through a [`RuntimeExecutor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
	pub mock_signature_host: bool,
	pub allow_unresolved_imports: bool,
	/// 0 = off, 5 = trace.
	pub log_level: u32,
}

/// Cheap handle for running runtime calls through a shared [`ExecutorService`].
#[derive(Clone)]
pub struct RuntimeExecutor {
	service: Arc<ExecutorService>,
	config: Arc<RwLock<ExecutorConfig>>,
}

impl RuntimeExecutor {
	pub fn new(service: Arc<ExecutorService>, config: ExecutorConfig) -> Self {
		Self { service, config: Arc::new(RwLock::new(config)) }
	}

	pub fn config(&self) -> ExecutorConfig {
		*self.config.read()
	}

	/// Change the runtime log level for subsequent calls.
	pub fn set_log_level(&self, level: u32) {
		self.config.write().log_level = level;
	}

	/// Run a single entry point.
	pub async fn call(
		&self,
		code: &Arc<[u8]>,
		method: &str,
		args: &[u8],
		storage: Arc<dyn StorageProvider>,
	) -> Result<CallOutcome, ExecutorError> {
		self.call_many(code, vec![RuntimeCall::new(method, args)], storage).await
	}

	/// Run `calls` in order, each seeing the changes of the previous ones.
	pub async fn call_many(
		&self,
		code: &Arc<[u8]>,
		calls: Vec<RuntimeCall>,
		storage: Arc<dyn StorageProvider>,
	) -> Result<CallOutcome, ExecutorError> {
		let config = self.config();
		let request = ExecutionRequest {
			runtime_bytecode: code.clone(),
			calls,
			mock_signature_host: config.mock_signature_host,
			allow_unresolved_imports: config.allow_unresolved_imports,
			log_level: config.log_level,
		};
		self.service.execute(request, storage).await
	}
}

impl std::fmt::Debug for RuntimeExecutor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RuntimeExecutor")
			.field("workers", &self.service.workers())
			.field("config", &self.config())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{executor::StorageDiffEntry, testing::MemoryProvider};
	use async_trait::async_trait;

	/// Echoes the arguments of the last call and records every call name as a change.
	struct EchoEngine;

	#[async_trait(?Send)]
	impl RuntimeEngine for EchoEngine {
		async fn execute(
			&self,
			request: &ExecutionRequest,
			storage: Arc<dyn StorageProvider>,
		) -> Result<CallOutcome, ExecutorError> {
			let mut outcome = CallOutcome::default();
			for call in &request.calls {
				if call.method() == "fail" {
					return Err(ExecutorError::RuntimeError {
						method: call.method().into(),
						message: "trap".into(),
					});
				}
				let value = storage.get(call.method().as_bytes()).await?;
				outcome.result = value.unwrap_or_else(|| call.args().to_vec());
				outcome
					.storage_diff
					.push(StorageDiffEntry(call.method().as_bytes().to_vec(), Some(vec![1])));
			}
			Ok(outcome)
		}
	}

	fn executor(workers: usize) -> RuntimeExecutor {
		let service = ExecutorService::spawn(Arc::new(EchoEngine), workers).unwrap();
		RuntimeExecutor::new(Arc::new(service), ExecutorConfig::default())
	}

	#[tokio::test]
	async fn call_returns_engine_outcome() {
		let executor = executor(1);
		let storage = Arc::new(MemoryProvider::from_iter([(b"stored".to_vec(), vec![9])]));
		let code: Arc<[u8]> = Arc::from(vec![0u8]);

		let outcome = executor.call(&code, "echo", &[1, 2], storage.clone()).await.unwrap();
		assert_eq!(outcome.result, vec![1, 2]);

		let outcome = executor.call(&code, "stored", &[], storage).await.unwrap();
		assert_eq!(outcome.result, vec![9]);
	}

	#[tokio::test]
	async fn call_many_accumulates_changes() {
		let executor = executor(2);
		let storage = Arc::new(MemoryProvider::default());
		let code: Arc<[u8]> = Arc::from(vec![0u8]);
		let calls = vec![RuntimeCall::new("a", vec![1]), RuntimeCall::new("b", vec![2])];

		let outcome = executor.call_many(&code, calls, storage).await.unwrap();
		assert_eq!(outcome.result, vec![2]);
		assert_eq!(outcome.storage_diff.len(), 2);
	}

	#[tokio::test]
	async fn engine_errors_are_returned() {
		let executor = executor(1);
		let storage = Arc::new(MemoryProvider::default());
		let code: Arc<[u8]> = Arc::from(vec![0u8]);

		let err = executor.call(&code, "fail", &[], storage).await.unwrap_err();
		assert!(matches!(err, ExecutorError::RuntimeError { .. }));
	}

	#[tokio::test]
	async fn concurrent_requests_complete() {
		let executor = executor(3);
		let storage: Arc<dyn StorageProvider> = Arc::new(MemoryProvider::default());
		let code: Arc<[u8]> = Arc::from(vec![0u8]);

		let calls = (0..10u8).map(|i| {
			let executor = executor.clone();
			let storage = storage.clone();
			let code = code.clone();
			async move { executor.call(&code, "echo", &[i], storage).await }
		});
		let results = futures::future::join_all(calls).await;
		for (i, result) in results.into_iter().enumerate() {
			assert_eq!(result.unwrap().result, vec![i as u8]);
		}
	}

	#[test]
	fn log_level_can_be_changed() {
		let executor = executor(1);
		executor.set_log_level(4);
		assert_eq!(executor.config().log_level, 4);
	}
}
