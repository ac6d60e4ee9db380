#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use gs_columnar::{ColumnData, IndexBuffer};
use gs_sort::{SortComparator, sort_complex};
use gs_stats::{
    BoxplotBuilder, BoxplotStatistics, CategoricalStatsBuilder, CategoricalStatistics,
    DateStatsBuilder, DateStatistics, NumberStatsBuilder, NumberStatistics, StringStatsBuilder,
    StringStatistics,
};
use gs_types::{MISSING_CATEGORY, MISSING_DATE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("the worker thread is not running")]
    Stopped,
    #[error("no reply arrived within the timeout")]
    Timeout,
}

/// A value held by the worker's reference cache: either a full column
/// payload or a row-subset index buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefValue {
    Column(ColumnData),
    Indices(IndexBuffer),
}

/// Top-N request parameter: either a result size or a fixed vocabulary
/// that pins the output order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopNSpec {
    Count(usize),
    Vocabulary(Vec<String>),
}

/// Requests accepted by the worker. Field names follow the wire protocol
/// (`type` tag, `uid` correlation id, camelCase payload fields).
///
/// Inline `data`/`indices` are used when present and additionally cached
/// under `refData`/`refIndices` when those keys are given; otherwise the
/// payload is resolved from the reference cache under those keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerRequest {
    Sort {
        uid: u64,
        indices: IndexBuffer,
        #[serde(default)]
        sort_orders: Vec<SortComparator>,
    },
    SetRef {
        uid: u64,
        #[serde(rename = "ref")]
        ref_key: String,
        #[serde(default)]
        data: Option<RefValue>,
    },
    DeleteRef {
        uid: u64,
        #[serde(rename = "ref")]
        ref_key: String,
        #[serde(default)]
        prefix_match: bool,
    },
    NumberStats {
        uid: u64,
        domain: [f64; 2],
        bin_count: usize,
        #[serde(default)]
        data: Option<ColumnData>,
        #[serde(default)]
        indices: Option<IndexBuffer>,
        #[serde(default)]
        ref_data: Option<String>,
        #[serde(default)]
        ref_indices: Option<String>,
    },
    DateStats {
        uid: u64,
        #[serde(default)]
        template: Option<DateStatistics>,
        #[serde(default)]
        data: Option<ColumnData>,
        #[serde(default)]
        indices: Option<IndexBuffer>,
        #[serde(default)]
        ref_data: Option<String>,
        #[serde(default)]
        ref_indices: Option<String>,
    },
    CategoricalStats {
        uid: u64,
        categories: Vec<String>,
        #[serde(default)]
        data: Option<ColumnData>,
        #[serde(default)]
        indices: Option<IndexBuffer>,
        #[serde(default)]
        ref_data: Option<String>,
        #[serde(default)]
        ref_indices: Option<String>,
    },
    StringStats {
        uid: u64,
        #[serde(default)]
        top_n: Option<TopNSpec>,
        #[serde(default)]
        data: Option<ColumnData>,
        #[serde(default)]
        indices: Option<IndexBuffer>,
        #[serde(default)]
        ref_data: Option<String>,
        #[serde(default)]
        ref_indices: Option<String>,
    },
    BoxplotStats {
        uid: u64,
        #[serde(default)]
        data: Option<ColumnData>,
        #[serde(default)]
        indices: Option<IndexBuffer>,
        #[serde(default)]
        ref_data: Option<String>,
        #[serde(default)]
        ref_indices: Option<String>,
    },
}

/// Replies, correlated to requests by the echoed `uid`. Cache mutations
/// produce no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerResponse {
    Sort { uid: u64, order: IndexBuffer },
    NumberStats { uid: u64, stats: NumberStatistics },
    DateStats { uid: u64, stats: DateStatistics },
    CategoricalStats { uid: u64, stats: CategoricalStatistics },
    StringStats { uid: u64, stats: StringStatistics },
    BoxplotStats { uid: u64, stats: BoxplotStatistics },
}

fn contract_violation(detail: &str) {
    debug_assert!(false, "{detail}");
    log::warn!("dropping request: {detail}");
}

/// The message dispatcher. Owns the reference cache; single-threaded by
/// construction, so no locking is required.
#[derive(Debug, Default)]
pub struct WorkerRuntime {
    cache: HashMap<String, RefValue>,
}

impl WorkerRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn contains_ref(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Dispatch one request. Cache mutations and dropped requests return
    /// `None`; everything else returns a reply carrying the request's
    /// `uid`.
    pub fn handle(&mut self, request: WorkerRequest) -> Option<WorkerResponse> {
        match request {
            WorkerRequest::Sort {
                uid,
                indices,
                sort_orders,
            } => Some(WorkerResponse::Sort {
                uid,
                order: sort_complex(indices, &sort_orders),
            }),
            WorkerRequest::SetRef {
                uid: _,
                ref_key,
                data,
            } => {
                match data {
                    Some(value) => {
                        self.cache.insert(ref_key, value);
                    }
                    None => {
                        self.cache.remove(&ref_key);
                    }
                }
                None
            }
            WorkerRequest::DeleteRef {
                uid: _,
                ref_key,
                prefix_match,
            } => {
                if prefix_match {
                    self.cache.retain(|key, _| !key.starts_with(&ref_key));
                } else {
                    self.cache.remove(&ref_key);
                }
                None
            }
            WorkerRequest::NumberStats {
                uid,
                domain,
                bin_count,
                data,
                indices,
                ref_data,
                ref_indices,
            } => {
                let stats = self.with_inputs(data, indices, ref_data, ref_indices, |col, sel| {
                    let values = require_numbers(col)?;
                    let mut builder = NumberStatsBuilder::new(domain[0], domain[1], bin_count);
                    match sel {
                        Some(subset) => {
                            for row in subset.iter() {
                                builder.push(values.get(row).copied().unwrap_or(f64::NAN));
                            }
                        }
                        None => builder.push_many(values.iter().copied()),
                    }
                    Some(builder.build())
                })??;
                Some(WorkerResponse::NumberStats { uid, stats })
            }
            WorkerRequest::DateStats {
                uid,
                template,
                data,
                indices,
                ref_data,
                ref_indices,
            } => {
                let stats = self.with_inputs(data, indices, ref_data, ref_indices, |col, sel| {
                    let codes = require_dates(col)?;
                    let mut builder = match &template {
                        Some(template) => DateStatsBuilder::with_template(template),
                        None => DateStatsBuilder::new(),
                    };
                    match sel {
                        Some(subset) => {
                            for row in subset.iter() {
                                builder.push_code(codes.get(row).copied().unwrap_or(MISSING_DATE));
                            }
                        }
                        None => builder.push_codes(codes.iter().copied()),
                    }
                    Some(builder.build())
                })??;
                Some(WorkerResponse::DateStats { uid, stats })
            }
            WorkerRequest::CategoricalStats {
                uid,
                categories,
                data,
                indices,
                ref_data,
                ref_indices,
            } => {
                let stats = self.with_inputs(data, indices, ref_data, ref_indices, |col, sel| {
                    let codes = require_categories(col)?;
                    let mut builder = CategoricalStatsBuilder::new(categories);
                    match sel {
                        Some(subset) => {
                            for row in subset.iter() {
                                builder
                                    .push_code(codes.get(row).copied().unwrap_or(MISSING_CATEGORY));
                            }
                        }
                        None => builder.push_codes(codes.iter().copied()),
                    }
                    Some(builder.build())
                })??;
                Some(WorkerResponse::CategoricalStats { uid, stats })
            }
            WorkerRequest::StringStats {
                uid,
                top_n,
                data,
                indices,
                ref_data,
                ref_indices,
            } => {
                let stats = self.with_inputs(data, indices, ref_data, ref_indices, |col, sel| {
                    let values = require_text(col)?;
                    let mut builder = match top_n {
                        None => StringStatsBuilder::new(),
                        Some(TopNSpec::Count(n)) => StringStatsBuilder::with_top_n(n),
                        Some(TopNSpec::Vocabulary(vocab)) => {
                            StringStatsBuilder::with_vocabulary(vocab)
                        }
                    };
                    match sel {
                        Some(subset) => {
                            for row in subset.iter() {
                                builder.push(values.get(row).and_then(|v| v.as_deref()));
                            }
                        }
                        None => builder.push_many(values.iter().map(|v| v.as_deref())),
                    }
                    Some(builder.build())
                })??;
                Some(WorkerResponse::StringStats { uid, stats })
            }
            WorkerRequest::BoxplotStats {
                uid,
                data,
                indices,
                ref_data,
                ref_indices,
            } => {
                let stats = self.with_inputs(data, indices, ref_data, ref_indices, |col, sel| {
                    let values = require_numbers(col)?;
                    let mut builder = match sel {
                        Some(subset) => BoxplotBuilder::with_expected_count(subset.len()),
                        None => BoxplotBuilder::with_expected_count(values.len()),
                    };
                    match sel {
                        Some(subset) => {
                            for row in subset.iter() {
                                builder.push(values.get(row).copied().unwrap_or(f64::NAN));
                            }
                        }
                        None => builder.push_many(values.iter().copied()),
                    }
                    Some(builder.build())
                })??;
                Some(WorkerResponse::BoxplotStats { uid, stats })
            }
        }
    }

    /// Resolve a stats request's column and optional row subset, then run
    /// `f` over them. Inline payloads tagged with a ref key are moved into
    /// the cache first and read back, so later requests can reuse them
    /// without re-transmission. Irresolvable inputs drop the request.
    fn with_inputs<R>(
        &mut self,
        data: Option<ColumnData>,
        indices: Option<IndexBuffer>,
        ref_data: Option<String>,
        ref_indices: Option<String>,
        f: impl FnOnce(&ColumnData, Option<&IndexBuffer>) -> R,
    ) -> Option<R> {
        let mut data = data;
        let mut indices = indices;
        if let Some(key) = ref_data.as_deref() {
            if let Some(column) = data.take() {
                self.cache.insert(key.to_owned(), RefValue::Column(column));
            }
        }
        if let Some(key) = ref_indices.as_deref() {
            if let Some(buffer) = indices.take() {
                self.cache.insert(key.to_owned(), RefValue::Indices(buffer));
            }
        }

        let column: &ColumnData = match (&data, ref_data.as_deref()) {
            (Some(column), _) => column,
            (None, Some(key)) => match self.cache.get(key) {
                Some(RefValue::Column(column)) => column,
                Some(RefValue::Indices(_)) => {
                    contract_violation(&format!("ref {key:?} holds indices, not column data"));
                    return None;
                }
                None => {
                    contract_violation(&format!("ref {key:?} was never set"));
                    return None;
                }
            },
            (None, None) => {
                contract_violation("stats request carries neither data nor refData");
                return None;
            }
        };

        let subset: Option<&IndexBuffer> = match (&indices, ref_indices.as_deref()) {
            (Some(buffer), _) => Some(buffer),
            (None, Some(key)) => match self.cache.get(key) {
                Some(RefValue::Indices(buffer)) => Some(buffer),
                Some(RefValue::Column(_)) => {
                    contract_violation(&format!("ref {key:?} holds column data, not indices"));
                    return None;
                }
                None => {
                    contract_violation(&format!("ref {key:?} was never set"));
                    return None;
                }
            },
            (None, None) => None,
        };

        Some(f(column, subset))
    }

    /// Decode a JSON envelope, dispatch it, and serialize the reply.
    ///
    /// Envelopes that do not decode as a request (missing `type`/`uid`,
    /// unknown `type`, malformed payload) are dropped silently; the
    /// channel is fire-and-forget and has no error reply.
    pub fn handle_wire(&mut self, envelope: &str) -> Option<String> {
        let request: WorkerRequest = match serde_json::from_str(envelope) {
            Ok(request) => request,
            Err(err) => {
                log::debug!("dropping malformed envelope: {err}");
                return None;
            }
        };
        let response = self.handle(request)?;
        match serde_json::to_string(&response) {
            Ok(reply) => Some(reply),
            Err(err) => {
                log::debug!("dropping unserializable reply: {err}");
                None
            }
        }
    }
}

fn require_numbers(column: &ColumnData) -> Option<&[f64]> {
    match column.as_numbers() {
        Ok(values) => Some(values),
        Err(err) => {
            contract_violation(&err.to_string());
            None
        }
    }
}

fn require_dates(column: &ColumnData) -> Option<&[i64]> {
    match column.as_dates() {
        Ok(codes) => Some(codes),
        Err(err) => {
            contract_violation(&err.to_string());
            None
        }
    }
}

fn require_categories(column: &ColumnData) -> Option<&[u32]> {
    match column.as_categories() {
        Ok(codes) => Some(codes),
        Err(err) => {
            contract_violation(&err.to_string());
            None
        }
    }
}

fn require_text(column: &ColumnData) -> Option<&[Option<String>]> {
    match column.as_text() {
        Ok(values) => Some(values),
        Err(err) => {
            contract_violation(&err.to_string());
            None
        }
    }
}

/// Handle to a dedicated worker thread running a [`WorkerRuntime`].
///
/// Requests are processed strictly in order of arrival; the caller is
/// never blocked and correlates replies by `uid`. Buffers move through
/// the channels rather than being copied. Dropping the handle closes the
/// request channel, letting the thread drain and exit before it is
/// joined.
#[derive(Debug)]
pub struct StatsWorker {
    sender: Option<mpsc::Sender<WorkerRequest>>,
    receiver: mpsc::Receiver<WorkerResponse>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StatsWorker {
    #[must_use]
    pub fn spawn() -> Self {
        let (request_tx, request_rx) = mpsc::channel::<WorkerRequest>();
        let (response_tx, response_rx) = mpsc::channel::<WorkerResponse>();
        let handle = thread::spawn(move || {
            let mut runtime = WorkerRuntime::new();
            while let Ok(request) = request_rx.recv() {
                if let Some(response) = runtime.handle(request) {
                    if response_tx.send(response).is_err() {
                        break;
                    }
                }
            }
        });
        Self {
            sender: Some(request_tx),
            receiver: response_rx,
            handle: Some(handle),
        }
    }

    /// Fire-and-forget send to the worker thread.
    pub fn post(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.sender
            .as_ref()
            .ok_or(WorkerError::Stopped)?
            .send(request)
            .map_err(|_| WorkerError::Stopped)
    }

    /// Block until the next reply arrives.
    pub fn recv(&self) -> Result<WorkerResponse, WorkerError> {
        self.receiver.recv().map_err(|_| WorkerError::Stopped)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<WorkerResponse, WorkerError> {
        self.receiver.recv_timeout(timeout).map_err(|err| match err {
            mpsc::RecvTimeoutError::Timeout => WorkerError::Timeout,
            mpsc::RecvTimeoutError::Disconnected => WorkerError::Stopped,
        })
    }
}

impl Drop for StatsWorker {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
