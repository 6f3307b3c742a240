//! Request/response contract of a worker that executes registered CTC
//! graphs. Every operation is asynchronous and reports completion through a
//! callback; the blocking variants wait for that callback to fire.

pub mod local;

use std::{
    sync::{mpsc, Arc, Mutex},
    time::Duration,
};

use nalgebra::DMatrix;

use crate::{
    ctc::CtcOptions,
    error::{CtcError, Result},
};

/// Completion callback, invoked exactly once.
pub type StatusCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Response buffer filled in by the worker before the callback fires.
pub type ResponseSlot<T> = Arc<Mutex<T>>;

/// One batch for the CTC kernel.
#[derive(Clone, Debug, Default)]
pub struct CtcBatch {
    pub seq_len: Vec<i32>,
    pub labels: Vec<Vec<i32>>,
    /// `num_time_steps x [batch_size, num_classes]` raw scores.
    pub inputs: Vec<DMatrix<f32>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorKey {
    Loss,
    Gradients,
}

#[derive(Clone, Debug, Default)]
pub struct GetStatusRequest;

#[derive(Clone, Debug, Default)]
pub struct GetStatusResponse {
    pub worker_name: String,
    pub num_graphs: usize,
    pub num_steps: usize,
}

#[derive(Clone, Debug, Default)]
pub struct RegisterGraphRequest {
    pub options: CtcOptions,
}

#[derive(Clone, Debug, Default)]
pub struct RegisterGraphResponse {
    pub graph_handle: String,
}

#[derive(Clone, Debug, Default)]
pub struct DeregisterGraphRequest {
    pub graph_handle: String,
}

#[derive(Clone, Debug, Default)]
pub struct DeregisterGraphResponse;

#[derive(Clone, Debug)]
pub struct RunGraphRequest {
    pub graph_handle: String,
    pub step_id: u64,
    pub batch: CtcBatch,
    pub compute_gradients: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RunGraphResponse {
    pub loss: Vec<f32>,
}

/// Releases the outputs kept for one step.
#[derive(Clone, Debug, Default)]
pub struct CleanupGraphRequest {
    pub step_id: u64,
}

#[derive(Clone, Debug, Default)]
pub struct CleanupGraphResponse;

/// Releases the outputs of every step.
#[derive(Clone, Debug, Default)]
pub struct CleanupAllRequest;

#[derive(Clone, Debug, Default)]
pub struct CleanupAllResponse {
    pub num_released: usize,
}

#[derive(Clone, Debug)]
pub struct RecvTensorRequest {
    pub step_id: u64,
    pub key: TensorKey,
}

#[derive(Clone, Debug, Default)]
pub struct RecvTensorResponse {
    /// `[1, batch_size]` for the loss, one matrix per time step for the
    /// gradients.
    pub tensor: Vec<DMatrix<f32>>,
}

#[derive(Clone, Debug, Default)]
pub struct LoggingRequest {
    /// Start (or keep) recording step statistics.
    pub enable_rpc_logging: bool,
    /// Drop everything recorded so far, after answering.
    pub clear: bool,
    /// Steps to return. Empty returns every recorded step.
    pub fetch_step_id: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepStats {
    pub step_id: u64,
    pub graph_handle: String,
    pub batch_size: usize,
    pub total_loss: f32,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct LoggingResponse {
    pub step: Vec<StepStats>,
}

#[derive(Clone, Debug, Default)]
pub struct TracingRequest {
    pub enable: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TracingResponse;

pub trait WorkerInterface: Send + Sync {
    fn get_status_async(
        &self,
        request: GetStatusRequest,
        response: ResponseSlot<GetStatusResponse>,
        done: StatusCallback,
    );

    fn register_graph_async(
        &self,
        request: RegisterGraphRequest,
        response: ResponseSlot<RegisterGraphResponse>,
        done: StatusCallback,
    );

    fn deregister_graph_async(
        &self,
        request: DeregisterGraphRequest,
        response: ResponseSlot<DeregisterGraphResponse>,
        done: StatusCallback,
    );

    fn run_graph_async(
        &self,
        request: RunGraphRequest,
        response: ResponseSlot<RunGraphResponse>,
        done: StatusCallback,
    );

    fn cleanup_graph_async(
        &self,
        request: CleanupGraphRequest,
        response: ResponseSlot<CleanupGraphResponse>,
        done: StatusCallback,
    );

    fn cleanup_all_async(
        &self,
        request: CleanupAllRequest,
        response: ResponseSlot<CleanupAllResponse>,
        done: StatusCallback,
    );

    fn recv_tensor_async(
        &self,
        request: RecvTensorRequest,
        response: ResponseSlot<RecvTensorResponse>,
        done: StatusCallback,
    );

    fn logging_async(
        &self,
        request: LoggingRequest,
        response: ResponseSlot<LoggingResponse>,
        done: StatusCallback,
    );

    fn tracing_async(
        &self,
        request: TracingRequest,
        response: ResponseSlot<TracingResponse>,
        done: StatusCallback,
    );

    fn get_status(&self, request: GetStatusRequest) -> Result<GetStatusResponse> {
        call_and_wait(|response, done| self.get_status_async(request, response, done))
    }

    fn register_graph(&self, request: RegisterGraphRequest) -> Result<RegisterGraphResponse> {
        call_and_wait(|response, done| self.register_graph_async(request, response, done))
    }

    fn deregister_graph(&self, request: DeregisterGraphRequest) -> Result<DeregisterGraphResponse> {
        call_and_wait(|response, done| self.deregister_graph_async(request, response, done))
    }

    fn run_graph(&self, request: RunGraphRequest) -> Result<RunGraphResponse> {
        call_and_wait(|response, done| self.run_graph_async(request, response, done))
    }

    fn cleanup_graph(&self, request: CleanupGraphRequest) -> Result<CleanupGraphResponse> {
        call_and_wait(|response, done| self.cleanup_graph_async(request, response, done))
    }

    fn cleanup_all(&self, request: CleanupAllRequest) -> Result<CleanupAllResponse> {
        call_and_wait(|response, done| self.cleanup_all_async(request, response, done))
    }

    fn recv_tensor(&self, request: RecvTensorRequest) -> Result<RecvTensorResponse> {
        call_and_wait(|response, done| self.recv_tensor_async(request, response, done))
    }

    fn logging(&self, request: LoggingRequest) -> Result<LoggingResponse> {
        call_and_wait(|response, done| self.logging_async(request, response, done))
    }

    fn tracing(&self, request: TracingRequest) -> Result<TracingResponse> {
        call_and_wait(|response, done| self.tracing_async(request, response, done))
    }
}

/// Issues an asynchronous call and blocks until its callback has fired.
fn call_and_wait<Resp, F>(call: F) -> Result<Resp>
where
    Resp: Default,
    F: FnOnce(ResponseSlot<Resp>, StatusCallback),
{
    let response = Arc::new(Mutex::new(Resp::default()));
    let (sender, receiver) = mpsc::sync_channel(1);

    call(
        Arc::clone(&response),
        Box::new(move |status| {
            // the waiting side only goes away once it has its answer
            let _ = sender.send(status);
        }),
    );

    receiver
        .recv()
        .map_err(|_| CtcError::Worker("completion callback dropped without firing".to_string()))??;

    let mut response = response
        .lock()
        .map_err(|_| CtcError::Worker("response buffer poisoned".to_string()))?;
    Ok(std::mem::take(&mut *response))
}
