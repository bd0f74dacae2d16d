//! Backend fault translation
//!
//! Every backend fault surfacing through a wrapped call or iterator is:
//!
//! 1. classified once into a [`FaultClass`]
//! 2. reported to the registered [`FaultObserver`], exactly once
//! 3. re-raised through the active [`ErrorConvention`]
//!
//! Nothing is retried or suppressed here. The caller-facing error keeps the
//! native fault two levels down its source chain:
//! `QueryError` -> [`ClassifiedFault`] -> [`BackendFault`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::datastore::BackendFault;
use crate::error::{DatastoreError, PersistenceError, QueryError};

/// Closed classification of backend faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    Timeout,
    BackendFailure,
    UserError,
    Unknown,
}

impl FaultClass {
    pub fn of(fault: &BackendFault) -> FaultClass {
        match fault {
            BackendFault::Timeout(_) => FaultClass::Timeout,
            BackendFault::InternalFailure(_) => FaultClass::BackendFailure,
            BackendFault::BadRequest(_) => FaultClass::UserError,
            BackendFault::Other(_) => FaultClass::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultClass::Timeout => "timeout",
            FaultClass::BackendFailure => "backend_failure",
            FaultClass::UserError => "user_error",
            FaultClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Intermediate wrapper: the native fault plus its class
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("datastore {class} fault")]
pub struct ClassifiedFault {
    pub class: FaultClass,
    #[source]
    pub fault: BackendFault,
}

impl ClassifiedFault {
    pub fn new(fault: BackendFault) -> Self {
        Self {
            class: FaultClass::of(&fault),
            fault,
        }
    }
}

/// Telemetry hook notified once per translated fault
pub trait FaultObserver {
    fn on_fault(&self, class: FaultClass, fault: &BackendFault);
}

/// Caller-facing error family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorConvention {
    /// [`DatastoreError`] family
    #[default]
    Datastore,
    /// [`PersistenceError`] family
    Persistence,
}

impl ErrorConvention {
    /// Wraps a classified fault in this convention's error family
    pub fn present(&self, classified: ClassifiedFault) -> QueryError {
        match self {
            ErrorConvention::Datastore => {
                let err = match classified.class {
                    FaultClass::Timeout => DatastoreError::Timeout(classified),
                    FaultClass::BackendFailure => DatastoreError::Failure(classified),
                    FaultClass::UserError => DatastoreError::BadRequest(classified),
                    FaultClass::Unknown => DatastoreError::Unknown(classified),
                };
                QueryError::Datastore(err)
            }
            ErrorConvention::Persistence => {
                let err = match classified.class {
                    FaultClass::Timeout => PersistenceError::QueryTimeout(classified),
                    FaultClass::BackendFailure => PersistenceError::DataStoreFailure(classified),
                    FaultClass::UserError => PersistenceError::User(classified),
                    FaultClass::Unknown => PersistenceError::Unknown(classified),
                };
                QueryError::Persistence(err)
            }
        }
    }
}

/// Classifies, observes and re-wraps backend faults
#[derive(Clone, Default)]
pub struct FaultTranslator {
    convention: ErrorConvention,
    observer: Option<Arc<dyn FaultObserver>>,
}

impl fmt::Debug for FaultTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultTranslator")
            .field("convention", &self.convention)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl FaultTranslator {
    pub fn new(convention: ErrorConvention) -> Self {
        Self {
            convention,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FaultObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn convention(&self) -> ErrorConvention {
        self.convention
    }

    pub fn translate(&self, fault: BackendFault) -> QueryError {
        let classified = ClassifiedFault::new(fault);
        if let Some(observer) = &self.observer {
            observer.on_fault(classified.class, &classified.fault);
        }
        self.convention.present(classified)
    }

    /// Translates the error of a single datastore call
    pub fn call<T>(&self, result: Result<T, BackendFault>) -> Result<T, QueryError> {
        result.map_err(|fault| self.translate(fault))
    }

    /// Wraps a fallible stream so every fault is translated on pull
    pub fn wrap<I>(&self, inner: I) -> Translated<I> {
        Translated {
            inner,
            translator: self.clone(),
        }
    }
}

/// Iterator adapter produced by [`FaultTranslator::wrap`]
pub struct Translated<I> {
    inner: I,
    translator: FaultTranslator,
}

impl<T, I> Iterator for Translated<I>
where
    I: Iterator<Item = Result<T, BackendFault>>,
{
    type Item = Result<T, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(item) => Some(Ok(item)),
            Err(fault) => Some(Err(self.translator.translate(fault))),
        }
    }
}
