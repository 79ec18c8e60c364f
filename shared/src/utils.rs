use uuid::Uuid;

// UUID 生成工具函数
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// 订阅端客户端标识：随机 UUID 的前 5 个字符
pub fn short_client_id() -> String {
    generate_uuid()[..5].to_string()
}
