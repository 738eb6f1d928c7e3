use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::{info, warn};

/// 代理解析结果
#[derive(Debug, PartialEq, Eq)]
enum ProxyResolution {
    /// 使用指定代理 URL
    UseProxy(String),
    /// 强制直连（显式设置 proxy = ""）
    ForceDirectConnect,
    /// 未配置，跟随系统/环境变量
    None,
}

fn resolve_proxy(proxy: Option<&str>) -> ProxyResolution {
    match proxy.map(str::trim) {
        Some("") => ProxyResolution::ForceDirectConnect,
        Some(p) => ProxyResolution::UseProxy(p.to_string()),
        None => ProxyResolution::None,
    }
}

/// 构建后端使用的 reqwest::Client。
///
/// - `proxy`: None=未配置（读取 HTTPS_PROXY/HTTP_PROXY），Some("")=强制直连，Some("http://...")=使用代理
/// - `connect_timeout`: 建立连接的超时时长；整体时限由调用方按请求设置（流式请求不设总超时）
pub fn build_http_client(proxy: Option<&str>, api_base: &str, connect_timeout: Duration) -> Client {
    let mut builder = Client::builder().connect_timeout(connect_timeout);

    match resolve_proxy(proxy) {
        ProxyResolution::UseProxy(proxy_url) => match Proxy::all(&proxy_url) {
            Ok(p) => {
                info!(proxy = %proxy_url, api_base = %api_base, "Backend using proxy");
                builder = builder.proxy(p);
            }
            Err(e) => {
                warn!(error = %e, proxy = %proxy_url, "Invalid proxy URL, falling back to direct connect");
            }
        },
        ProxyResolution::ForceDirectConnect => {
            // no_proxy() 禁用所有代理（包括环境变量）
            info!(api_base = %api_base, "Backend forced to direct connect (proxy disabled)");
            builder = builder.no_proxy();
        }
        ProxyResolution::None => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client with proxy, using default");
        Client::new()
    })
}
