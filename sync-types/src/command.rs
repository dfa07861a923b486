//! Command codes for the boxsync protocol.
//!
//! Every exchange starts with the requester writing a [`Request`] code. The
//! peer answers with one of the [`Reply`] codes listed by
//! [`Request::valid_replies`]; anything else is a protocol violation.
//! The introduce step is the one exception: the client opens with its
//! username string and the server answers [`Reply::Welcome`] or
//! [`Reply::NameTaken`].

use crate::WireError;

/// Codes sent by the side that initiates an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    /// Pull files: the full snapshot during login, pending shares afterwards.
    PollFiles,
    /// Register a file to be delivered to another participant.
    RegisterShare,
    /// Ask for the roster of connected participants.
    ListUsers,
    /// Push created or modified local files.
    PushFiles,
    /// Delete a file or directory on the remote side.
    DeleteFile,
}

/// Codes sent back by the side that services an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reply {
    /// Username accepted.
    Welcome,
    /// Username already in use.
    NameTaken,
    /// A file stream follows.
    FilesFollow,
    /// Nothing pending for this poll.
    NothingPending,
    /// Ready to receive share details.
    ShareAck,
    /// Ready to receive pushed files.
    PushAck,
    /// Ready to receive the path to delete.
    DeleteAck,
}

/// Replies accepted after the introduce string.
pub const INTRODUCE_REPLIES: &[Reply] = &[Reply::Welcome, Reply::NameTaken];

impl Request {
    /// All request codes, in wire order.
    pub const ALL: [Request; 5] = [
        Request::PollFiles,
        Request::RegisterShare,
        Request::ListUsers,
        Request::PushFiles,
        Request::DeleteFile,
    ];

    /// Encode as the wire integer.
    pub const fn code(self) -> i32 {
        match self {
            Self::PollFiles => 10,
            Self::RegisterShare => 20,
            Self::ListUsers => 30,
            Self::PushFiles => 40,
            Self::DeleteFile => 50,
        }
    }

    /// Decode a wire integer.
    pub fn from_code(code: i32) -> Result<Self, WireError> {
        match code {
            10 => Ok(Self::PollFiles),
            20 => Ok(Self::RegisterShare),
            30 => Ok(Self::ListUsers),
            40 => Ok(Self::PushFiles),
            50 => Ok(Self::DeleteFile),
            other => Err(WireError::UnknownCode(other)),
        }
    }

    /// The replies a peer may send for this request.
    ///
    /// `ListUsers` has no reply code: the roster string follows directly.
    pub const fn valid_replies(self) -> &'static [Reply] {
        match self {
            Self::PollFiles => &[Reply::FilesFollow, Reply::NothingPending],
            Self::RegisterShare => &[Reply::ShareAck],
            Self::ListUsers => &[],
            Self::PushFiles => &[Reply::PushAck],
            Self::DeleteFile => &[Reply::DeleteAck],
        }
    }

    /// Whether `reply` is a legal answer to this request.
    pub fn accepts(self, reply: Reply) -> bool {
        self.valid_replies().contains(&reply)
    }
}

impl Reply {
    /// All reply codes.
    pub const ALL: [Reply; 7] = [
        Reply::Welcome,
        Reply::NameTaken,
        Reply::FilesFollow,
        Reply::NothingPending,
        Reply::ShareAck,
        Reply::PushAck,
        Reply::DeleteAck,
    ];

    /// Encode as the wire integer.
    pub const fn code(self) -> i32 {
        match self {
            Self::Welcome => 65,
            Self::NameTaken => -1,
            Self::FilesFollow => 15,
            Self::NothingPending => 1,
            Self::ShareAck => 25,
            Self::PushAck => 45,
            Self::DeleteAck => 55,
        }
    }

    /// Decode a wire integer.
    pub fn from_code(code: i32) -> Result<Self, WireError> {
        match code {
            65 => Ok(Self::Welcome),
            -1 => Ok(Self::NameTaken),
            15 => Ok(Self::FilesFollow),
            1 => Ok(Self::NothingPending),
            25 => Ok(Self::ShareAck),
            45 => Ok(Self::PushAck),
            55 => Ok(Self::DeleteAck),
            other => Err(WireError::UnknownCode(other)),
        }
    }
}
