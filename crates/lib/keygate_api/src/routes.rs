//! Route paths.

pub const POST_MFA_VERIFY: &str = "/1/mfa/verify";
pub const POST_MFA_SEND_CODE: &str = "/1/mfa/send-code";
pub const POST_MFA_SETUP: &str = "/1/mfa/setup";
pub const POST_MFA_CHECK_CODE: &str = "/1/mfa/check-code";
pub const POST_MFA_ENABLE: &str = "/1/mfa/enable";
pub const POST_MFA_GENERATE_BACKUP_CODES: &str = "/1/mfa/generate-backup-codes";
pub const DELETE_MFA_DISABLE: &str = "/1/mfa/disable";

pub const POST_AUTH_PASSWORD_LOGIN: &str = "/1/auth/password/login";
pub const POST_AUTH_PASSWORD_REQUEST: &str = "/1/auth/password/request";
pub const POST_AUTH_PASSWORD_UPDATE: &str = "/1/auth/password/update";
pub const POST_AUTH_CONFIRM_ACCESS: &str = "/1/auth/confirm-access";
pub const POST_AUTH_LOGOUT: &str = "/1/auth/logout";
pub const GET_AUTH_SESSION: &str = "/1/auth/session";

pub const GET_USERS_ME: &str = "/1/users/me";
