/// 访问/处理日志（只追加）
pub mod audit;
/// API Key 鉴权
pub mod auth;
pub mod health;
/// 图片缩放流水线与 `/images` 路由
pub mod image;
/// 按 IP 限流
pub mod rate_limit;
/// 首页
pub mod views;
