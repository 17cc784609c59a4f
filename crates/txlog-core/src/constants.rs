// ABOUTME: Toolkit-wide constants for trace propagation, masking, and HTTP defaults
// ABOUTME: Centralizes default header names, limits, and delays used across components
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

/// Trace identifier propagation defaults
pub mod trace {
    /// Default HTTP header carrying the trace identifier
    pub const DEFAULT_HEADER: &str = "X-Trace-Id";
    /// Default in-process context key name for the trace identifier
    pub const DEFAULT_CONTEXT_KEY: &str = "trace_id";
}

/// Masking defaults
pub mod masking {
    /// Fixed-width token used by full and email masks
    pub const REDACTION_TOKEN: &str = "*******";
    /// Character substituted for each hidden character in partial masks
    pub const MASK_CHAR: char = '*';
    /// Header names always redacted when headers are surfaced in debug mode
    pub const SENSITIVE_HEADERS: &[&str] = &[
        "authorization",
        "proxy-authorization",
        "cookie",
        "set-cookie",
        "x-api-key",
        "x-auth-token",
        "x-access-token",
    ];
}

/// HTTP pipeline defaults
pub mod http {
    /// Default maximum upload body size (10 MiB)
    pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
    /// Maximum request body buffered by the typed handler pipeline
    pub const MAX_JSON_BODY_BYTES: usize = 10 * 1024 * 1024;
    /// Default health check path
    pub const DEFAULT_HEALTH_PATH: &str = "/health";
    /// Cache policy applied to static files
    pub const STATIC_CACHE_CONTROL: &str = "public, max-age=86400";
    /// JSON content type
    pub const CONTENT_TYPE_JSON: &str = "application/json";
}

/// Messaging defaults
pub mod messaging {
    use std::time::Duration;

    /// Hard cap on channels opened per subscription
    pub const MAX_CHANNELS: usize = 10;
    /// Default retry-ledger eviction period
    pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_secs(60 * 60);
    /// Default delay between reconnect attempts
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
    /// Default delay before a nack-with-requeue
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
    /// Default maximum number of requeues per correlation id
    pub const DEFAULT_MAX_RETRY: u32 = 3;
    /// Default per-channel prefetch count
    pub const DEFAULT_PREFETCH: u16 = 10;
    /// AMQP persistent delivery mode
    pub const DELIVERY_MODE_PERSISTENT: u8 = 2;
}
