use std::sync::Arc;

use domain::ConnectionId;

use crate::registry::ConnectionHandle;

/// 将同一负载独立投递到每个连接。
///
/// 单个连接失败不会影响其余连接，返回投递失败、需要驱逐的连接。
pub fn fan_out(targets: &[ConnectionHandle], payload: &Arc<str>) -> Vec<ConnectionId> {
    targets
        .iter()
        .filter_map(|target| match target.try_deliver(payload.clone()) {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(
                    connection_id = %target.id(),
                    user_id = %target.user_id(),
                    error = %err,
                    "fan-out delivery failed"
                );
                Some(target.id())
            }
        })
        .collect()
}
