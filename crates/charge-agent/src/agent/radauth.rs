//! The `*radauth` processor action.
//!
//! Verifies the inbound Access-Request against the expected password held in
//! `*vars.UserPassword`, using the first authentication attribute present:
//! User-Password (PAP), CHAP-Password, or the Microsoft MS-CHAP-v2 pair.
//! All comparisons are constant-time.

use super::processor::RadiusCtx;
use super::request::AgentRequest;
use super::{AgentError, META_VARS, USER_PASSWORD};
use radius_proto::auth::constant_time_eq;
use radius_proto::chap::{verify_chap_response, ChapResponse};
use radius_proto::mschap::{success_attribute_value, verify_ms_chap2, MsChap2Response, MsChapError};
use radius_proto::{Attribute, MICROSOFT, VENDOR_SPECIFIC};

/// Returns whether verification passed. On MS-CHAP-v2 success the
/// MS-CHAP2-Success attribute is attached to the reply.
pub fn radauth_request(areq: &AgentRequest, ctx: &mut RadiusCtx<'_>) -> Result<bool, AgentError> {
    let password = areq
        .field_as_string(&format!("{META_VARS}.{USER_PASSWORD}"))
        .ok_or(AgentError::MissingPassword)?;
    let request = ctx.request;
    let dictionary = ctx.dictionary;

    if let Some(attr) = dictionary
        .attribute("User-Password")
        .and_then(|d| request.find_attribute(d.code))
    {
        let decrypted = radius_proto::decrypt_user_password(
            &attr.value,
            ctx.secret,
            &request.authenticator,
        )?;
        return Ok(constant_time_eq(decrypted.as_bytes(), password.as_bytes()));
    }

    if let Some(attr) = dictionary
        .attribute("CHAP-Password")
        .and_then(|d| request.find_attribute(d.code))
    {
        let response = ChapResponse::from_bytes(&attr.value)?;
        let challenge = dictionary
            .attribute("CHAP-Challenge")
            .and_then(|d| request.find_attribute(d.code))
            .map(|c| c.value.clone())
            .unwrap_or_else(|| request.authenticator.to_vec());
        return Ok(verify_chap_response(&response, &password, &challenge));
    }

    let challenge_code = dictionary
        .vendor_attribute(MICROSOFT, "MS-CHAP-Challenge")
        .map(|(_, d)| d.code);
    let response_code = dictionary
        .vendor_attribute(MICROSOFT, "MS-CHAP2-Response")
        .map(|(_, d)| d.code);
    let success_code = dictionary
        .vendor_attribute(MICROSOFT, "MS-CHAP2-Success")
        .map(|(_, d)| d.code);
    let vendor_id = dictionary.vendor_id(MICROSOFT);
    if let (Some(vendor_id), Some(challenge_code), Some(response_code), Some(success_code)) =
        (vendor_id, challenge_code, response_code, success_code)
    {
        let mut challenge = None;
        let mut response = None;
        for attr in request.find_all_attributes(VENDOR_SPECIFIC) {
            let Ok(vsa) = attr.as_vendor() else { continue };
            if vsa.vendor_id != vendor_id {
                continue;
            }
            if vsa.vendor_type == challenge_code {
                challenge = Some(vsa.value);
            } else if vsa.vendor_type == response_code {
                response = Some(vsa.value);
            }
        }
        if let (Some(challenge), Some(response)) = (challenge, response) {
            let challenge: [u8; 16] = challenge
                .try_into()
                .map_err(|bad: Vec<u8>| MsChapError::InvalidChallengeLength(bad.len()))?;
            let response = MsChap2Response::from_bytes(&response)?;
            let user_name = dictionary
                .attribute("User-Name")
                .and_then(|d| request.find_attribute(d.code))
                .and_then(|a| a.as_string().ok())
                .unwrap_or_default();
            return match verify_ms_chap2(&response, &challenge, &user_name, &password) {
                Some(authenticator_response) => {
                    ctx.reply.add_attribute(Attribute::vendor(
                        vendor_id,
                        success_code,
                        success_attribute_value(response.ident, &authenticator_response),
                    )?);
                    Ok(true)
                }
                None => Ok(false),
            };
        }
    }

    Err(AgentError::NoAuthAttribute)
}
