use lantern_types::{
    FetchType, Headers, ResponseInfo, TaskId, TaskType, Timestamp, Transaction,
    TransactionTiming, TransferSize,
};

/// An outgoing request as seen by the producer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkRequest {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    pub task_type: TaskType,
}

impl NetworkRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }
}

/// Response head received for a task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkResponse {
    pub status_code: u16,
    pub headers: Headers,
}

impl NetworkResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Timing and size of one fetch attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionMetrics {
    pub fetch_type: FetchType,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub transfer_size: TransferSize,
    pub response: Option<NetworkResponse>,
}

impl TransactionMetrics {
    pub(crate) fn into_transaction(self, task_id: TaskId) -> Transaction {
        let mut transaction = Transaction::new(task_id, self.fetch_type, self.start);
        transaction.timing = TransactionTiming {
            start: self.start,
            end: self.end,
        };
        transaction.transfer_size = self.transfer_size;
        transaction.response = self.response.map(|r| ResponseInfo {
            status_code: r.status_code,
            headers: r.headers,
        });
        transaction
    }
}

/// Metrics delivered with a task's completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskMetrics {
    /// Fetch attempts, in the order they started.
    pub transactions: Vec<TransactionMetrics>,
}
