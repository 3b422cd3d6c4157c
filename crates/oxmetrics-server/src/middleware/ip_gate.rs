use crate::error::IngestError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use ipnet::IpNet;
use oxmetrics_common::REAL_IP_HEADER;
use std::net::IpAddr;

/// Rejects requests whose `X-Real-IP` is missing, unparsable, or outside the
/// trusted subnet. A server without a subnet admits everything.
pub async fn ip_gate(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, IngestError> {
    if let Some(subnet) = &state.trusted_subnet {
        let advertised = req
            .headers()
            .get(REAL_IP_HEADER)
            .map(|v| v.to_str().unwrap_or_default());
        if let Err(e) = admit(subnet, advertised) {
            tracing::warn!(error = %e, "Request rejected by IP gate");
            return Err(e);
        }
    }
    Ok(next.run(req).await)
}

/// Checks an advertised source address against `subnet`. Shared with the
/// gRPC service.
pub fn admit(subnet: &IpNet, advertised: Option<&str>) -> Result<IpAddr, IngestError> {
    let raw = advertised.ok_or_else(|| IngestError::Forbidden("no source address".into()))?;
    let ip: IpAddr = raw
        .trim()
        .parse()
        .map_err(|_| IngestError::Forbidden(format!("unparsable address {raw:?}")))?;
    if subnet.contains(&ip) {
        Ok(ip)
    } else {
        Err(IngestError::Forbidden(ip.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_membership() {
        let subnet: IpNet = "10.0.0.0/24".parse().unwrap();
        assert!(admit(&subnet, Some("10.0.0.5")).is_ok());
        assert!(admit(&subnet, Some(" 10.0.0.255 ")).is_ok());
        assert!(matches!(admit(&subnet, Some("10.0.1.5")), Err(IngestError::Forbidden(_))));
        assert!(matches!(admit(&subnet, Some("garbage")), Err(IngestError::Forbidden(_))));
        assert!(matches!(admit(&subnet, None), Err(IngestError::Forbidden(_))));
        assert!(admit(&subnet, Some("::1")).is_err());
    }
}
