use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{Extensions, HeaderMap, request::Parts},
};

use crate::domain::{FALLBACK_VOTER_IP, VoterId};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Voter identity for the current request.
///
/// Precedence: first `X-Forwarded-For` entry, `X-Real-IP`, TCP peer address,
/// then loopback. The headers are client-controlled and taken at face value.
pub struct Voter(pub VoterId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Voter
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(voter_id_from(&parts.headers, &parts.extensions)))
    }
}

pub(crate) fn voter_id_from(headers: &HeaderMap, extensions: &Extensions) -> VoterId {
    resolve_voter_id(headers, peer_addr(extensions))
}

/// Key for the vote rate limiter: the TCP peer address when known, so rotating
/// forwarding headers on one connection does not reset the budget.
pub(crate) fn rate_limit_key_from(headers: &HeaderMap, extensions: &Extensions) -> VoterId {
    match peer_addr(extensions) {
        Some(addr) => VoterId::new(addr.ip().to_string()),
        None => resolve_voter_id(headers, None),
    }
}

fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn resolve_voter_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> VoterId {
    let forwarded = header_str(headers, X_FORWARDED_FOR)
        .and_then(|raw| raw.split(',').map(str::trim).find(|s| !s.is_empty()));
    if let Some(ip) = forwarded {
        return VoterId::new(ip);
    }
    if let Some(ip) = header_str(headers, X_REAL_IP) {
        return VoterId::new(ip);
    }
    match peer {
        Some(addr) => VoterId::new(addr.ip().to_string()),
        None => VoterId::new(FALLBACK_VOTER_IP),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let raw = headers.get(name)?.to_str().ok()?.trim();
    if raw.is_empty() { None } else { Some(raw) }
}
