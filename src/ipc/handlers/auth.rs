use super::{required_str, store_ref};
use crate::identity;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, SessionUser};
use crate::model::UserDoc;
use crate::store::Collection;
use serde_json::json;

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(&state.store, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let found = match identity::verify(store, &email, &password) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(ident) = found else {
        return err(&req.id, "auth_failed", "invalid email or password", None);
    };

    // The role claim comes from the user document; an identity without one
    // signs in with no role and the frontend keeps it on the landing page.
    let role = match store.get(Collection::Users, &ident.uid) {
        Ok(Some(value)) => serde_json::from_value::<UserDoc>(value)
            .ok()
            .map(|u| u.role),
        Ok(None) => None,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // A fresh sign-in tears down whatever the previous user had open.
    if let Some(viewer) = state.viewer.as_mut() {
        viewer.close();
    }
    state.viewer = None;
    state.session = Some(SessionUser {
        uid: ident.uid.clone(),
        email: ident.email.clone(),
        role,
    });

    ok(
        &req.id,
        json!({
            "uid": ident.uid,
            "email": ident.email,
            "role": role.map(|r| r.as_str()),
            "landing": role.map(|r| r.landing()),
        }),
    )
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(viewer) = state.viewer.as_mut() {
        viewer.close();
    }
    state.viewer = None;
    let was_signed_in = state.session.take().is_some();
    ok(&req.id, json!({ "signedOut": was_signed_in }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    match &state.session {
        Some(session) => ok(
            &req.id,
            json!({
                "uid": session.uid,
                "email": session.email,
                "role": session.role.map(|r| r.as_str()),
            }),
        ),
        None => ok(&req.id, json!({ "uid": null })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
