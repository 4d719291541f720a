//! 已上传文件的只读访问，不经过准入检查。

use std::path::Path;
use tower_http::services::ServeDir;

/// 将 `/files/<path>` 映射到存储根目录下的文件。
pub fn file_service(root: &Path) -> ServeDir {
    ServeDir::new(root).append_index_html_on_directories(false)
}
