use axum::Extension;
use axum::Json;

use crate::middleware::auth::AuthUser;
use crate::models::{DataResponse, UserData};

/// `GET /1/users/me`
pub async fn me_handler(
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<DataResponse<UserData>> {
    Json(DataResponse::new(UserData::from(&user)))
}
