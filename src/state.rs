use std::sync::Arc;

use crate::models::ModelCatalog;
use crate::services::chat_service::ChatService;
use crate::store::UsageStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UsageStore>,
    pub catalog: Arc<ModelCatalog>,
    pub chat: Arc<ChatService>,
}
