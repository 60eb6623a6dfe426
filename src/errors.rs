//! The crate-wide error taxonomy.
//!
//! Recoverable conditions travel through `Result` or the failure callback of
//! the operation that produced them; state-invariant violations inside the
//! pools panic instead, since they always indicate a bug in the caller.

#[derive(Debug, Fail)]
pub enum Error {
    /// A required argument was empty or otherwise unusable. Raised at the
    /// call site, before any asynchronous work starts.
    #[fail(display = "{} is invalid.", _0)]
    InvalidArgument(&'static str),

    /// No ready package resolves the location.
    #[fail(display = "Could not find asset '{}' in any ready package.", _0)]
    NotExist(String),

    /// The backing store accepted the request but signalled a failure.
    #[fail(display = "Could not load asset '{}'. {}", location, message)]
    LoadFailed { location: String, message: String },

    #[fail(display = "Scene asset '{}' is being loaded.", _0)]
    AlreadyLoading(String),

    #[fail(display = "Scene asset '{}' is already loaded.", _0)]
    AlreadyLoaded(String),

    #[fail(display = "Scene asset '{}' is being unloaded.", _0)]
    AlreadyUnloading(String),

    #[fail(display = "Scene asset '{}' is not loaded yet.", _0)]
    NotLoaded(String),

    #[fail(display = "Undefined package with name '{}'.", _0)]
    UnknownPackage(String),

    #[fail(display = "Initialization of package '{}' failed. {}", package, message)]
    InitializationFailed { package: String, message: String },

    #[fail(display = "{}", _0)]
    Io(#[fail(cause)] ::std::io::Error),

    #[fail(display = "{}", _0)]
    Bincode(#[fail(cause)] ::bincode::Error),

    #[fail(display = "{}", _0)]
    Json(#[fail(cause)] ::serde_json::Error),

    #[fail(display = "{}", _0)]
    Malformed(String),
}

pub type Result<T> = ::std::result::Result<T, Error>;

impl From<::std::io::Error> for Error {
    fn from(err: ::std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<::bincode::Error> for Error {
    fn from(err: ::bincode::Error) -> Self {
        Error::Bincode(err)
    }
}

impl From<::serde_json::Error> for Error {
    fn from(err: ::serde_json::Error) -> Self {
        Error::Json(err)
    }
}
