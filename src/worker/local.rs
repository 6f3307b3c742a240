use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    thread,
    time::Instant,
};

use log::{debug, info};
use nalgebra::DMatrix;

use crate::{
    ctc::CtcLossCalculator,
    error::{CtcError, Result},
};

use super::{
    CleanupAllRequest, CleanupAllResponse, CleanupGraphRequest, CleanupGraphResponse,
    DeregisterGraphRequest, DeregisterGraphResponse, GetStatusRequest, GetStatusResponse,
    LoggingRequest, LoggingResponse, RecvTensorRequest, RecvTensorResponse, RegisterGraphRequest,
    RegisterGraphResponse, ResponseSlot, RunGraphRequest, RunGraphResponse, StatusCallback,
    StepStats, TensorKey, TracingRequest, TracingResponse, WorkerInterface,
};

struct StepOutputs {
    graph_handle: String,
    loss: Vec<f32>,
    gradients: Option<Vec<DMatrix<f32>>>,
}

#[derive(Default)]
struct WorkerState {
    graphs: HashMap<String, CtcLossCalculator>,
    next_graph_id: u64,
    steps: HashMap<u64, StepOutputs>,
    rpc_logging: bool,
    step_log: Vec<StepStats>,
    tracing: bool,
}

/// In-process worker. Graphs are CTC kernel configurations; running one
/// evaluates a batch on a background thread and keeps the outputs by step
/// id until the step is cleaned up or its graph is deregistered.
#[derive(Clone)]
pub struct LocalWorker {
    name: String,
    state: Arc<RwLock<WorkerState>>,
}

impl LocalWorker {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(WorkerState::default())),
        }
    }

    fn poisoned() -> CtcError {
        CtcError::Worker("worker state poisoned".to_string())
    }

    fn read<T>(&self, f: impl FnOnce(&WorkerState) -> Result<T>) -> Result<T> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut WorkerState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        f(&mut state)
    }
}

/// Stores `value` in the response slot and reports `status`.
fn respond<T>(response: &ResponseSlot<T>, result: Result<T>, done: StatusCallback) {
    let status = result.and_then(|value| {
        let mut slot = response
            .lock()
            .map_err(|_| CtcError::Worker("response buffer poisoned".to_string()))?;
        *slot = value;
        Ok(())
    });

    done(status);
}

impl WorkerInterface for LocalWorker {
    fn get_status_async(
        &self,
        _request: GetStatusRequest,
        response: ResponseSlot<GetStatusResponse>,
        done: StatusCallback,
    ) {
        let result = self.read(|state| {
            Ok(GetStatusResponse {
                worker_name: self.name.clone(),
                num_graphs: state.graphs.len(),
                num_steps: state.steps.len(),
            })
        });
        respond(&response, result, done);
    }

    fn register_graph_async(
        &self,
        request: RegisterGraphRequest,
        response: ResponseSlot<RegisterGraphResponse>,
        done: StatusCallback,
    ) {
        let result = self.write(|state| {
            let graph_handle = format!("{}/graph-{:05}", self.name, state.next_graph_id);
            state.next_graph_id += 1;
            state
                .graphs
                .insert(graph_handle.clone(), CtcLossCalculator::new(request.options));
            info!("Registered {graph_handle}: {:?}", request.options);

            Ok(RegisterGraphResponse { graph_handle })
        });
        respond(&response, result, done);
    }

    fn deregister_graph_async(
        &self,
        request: DeregisterGraphRequest,
        response: ResponseSlot<DeregisterGraphResponse>,
        done: StatusCallback,
    ) {
        let result = self.write(|state| {
            state
                .graphs
                .remove(&request.graph_handle)
                .ok_or_else(|| CtcError::NotFound(format!("graph {}", request.graph_handle)))?;
            let before = state.steps.len();
            state
                .steps
                .retain(|_, outputs| outputs.graph_handle != request.graph_handle);
            info!(
                "Deregistered {}, released {} steps",
                request.graph_handle,
                before - state.steps.len()
            );

            Ok(DeregisterGraphResponse)
        });
        respond(&response, result, done);
    }

    fn run_graph_async(
        &self,
        request: RunGraphRequest,
        response: ResponseSlot<RunGraphResponse>,
        done: StatusCallback,
    ) {
        let calculator = self.read(|state| {
            state
                .graphs
                .get(&request.graph_handle)
                .cloned()
                .ok_or_else(|| CtcError::NotFound(format!("graph {}", request.graph_handle)))
        });
        let calculator = match calculator {
            Ok(calculator) => calculator,
            Err(err) => return done(Err(err)),
        };

        let worker = self.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let RunGraphRequest {
                graph_handle,
                step_id,
                batch,
                compute_gradients,
            } = request;

            let batch_size = batch.seq_len.len();
            let num_classes = batch.inputs.first().map(|m| m.ncols()).unwrap_or(0);
            let mut loss = vec![0f32; batch_size];
            let mut gradients = compute_gradients
                .then(|| vec![DMatrix::<f32>::zeros(batch_size, num_classes); batch.inputs.len()]);

            let result = calculator
                .calculate_loss(
                    batch.seq_len.as_slice(),
                    &batch.labels,
                    &batch.inputs,
                    &mut loss,
                    gradients.as_deref_mut(),
                )
                .and_then(|_| {
                    worker.write(|state| {
                        if !state.graphs.contains_key(&graph_handle) {
                            return Err(CtcError::NotFound(format!(
                                "graph {graph_handle} was deregistered during step {step_id}"
                            )));
                        }
                        if state.tracing {
                            debug!("{graph_handle} step {step_id}: loss {loss:?}");
                        }
                        if state.rpc_logging {
                            state.step_log.push(StepStats {
                                step_id,
                                graph_handle: graph_handle.clone(),
                                batch_size,
                                total_loss: loss.iter().sum(),
                                elapsed: start.elapsed(),
                            });
                        }
                        state.steps.insert(
                            step_id,
                            StepOutputs {
                                graph_handle: graph_handle.clone(),
                                loss: loss.clone(),
                                gradients,
                            },
                        );

                        Ok(RunGraphResponse { loss })
                    })
                });

            respond(&response, result, done);
        });
    }

    fn cleanup_graph_async(
        &self,
        request: CleanupGraphRequest,
        response: ResponseSlot<CleanupGraphResponse>,
        done: StatusCallback,
    ) {
        let result = self.write(|state| {
            if state.steps.remove(&request.step_id).is_none() {
                debug!("step {} has nothing to clean up", request.step_id);
            }
            Ok(CleanupGraphResponse)
        });
        respond(&response, result, done);
    }

    fn cleanup_all_async(
        &self,
        _request: CleanupAllRequest,
        response: ResponseSlot<CleanupAllResponse>,
        done: StatusCallback,
    ) {
        let result = self.write(|state| {
            let num_released = state.steps.len();
            state.steps.clear();
            info!("Released {num_released} steps");
            Ok(CleanupAllResponse { num_released })
        });
        respond(&response, result, done);
    }

    fn recv_tensor_async(
        &self,
        request: RecvTensorRequest,
        response: ResponseSlot<RecvTensorResponse>,
        done: StatusCallback,
    ) {
        let result = self.read(|state| {
            let outputs = state
                .steps
                .get(&request.step_id)
                .ok_or_else(|| CtcError::NotFound(format!("step {}", request.step_id)))?;

            let tensor = match request.key {
                TensorKey::Loss => vec![DMatrix::from_row_slice(
                    1,
                    outputs.loss.len(),
                    &outputs.loss,
                )],
                TensorKey::Gradients => outputs.gradients.clone().ok_or_else(|| {
                    CtcError::NotFound(format!("gradients of step {}", request.step_id))
                })?,
            };

            Ok(RecvTensorResponse { tensor })
        });
        respond(&response, result, done);
    }

    fn logging_async(
        &self,
        request: LoggingRequest,
        response: ResponseSlot<LoggingResponse>,
        done: StatusCallback,
    ) {
        let result = self.write(|state| {
            state.rpc_logging = request.enable_rpc_logging;

            let step = state
                .step_log
                .iter()
                .filter(|stats| {
                    request.fetch_step_id.is_empty()
                        || request.fetch_step_id.contains(&stats.step_id)
                })
                .cloned()
                .collect();
            if request.clear {
                state.step_log.clear();
            }

            Ok(LoggingResponse { step })
        });
        respond(&response, result, done);
    }

    fn tracing_async(
        &self,
        request: TracingRequest,
        response: ResponseSlot<TracingResponse>,
        done: StatusCallback,
    ) {
        let result = self.write(|state| {
            state.tracing = request.enable;
            info!("Step tracing {}", if request.enable { "on" } else { "off" });
            Ok(TracingResponse)
        });
        respond(&response, result, done);
    }
}
