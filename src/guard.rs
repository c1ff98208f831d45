use crate::api::{ApiError, CurrentUser};
use crate::session::PortalView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Doctor,
    Center,
    SubAdmin,
    Other(String),
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value {
            "Doctor" => Role::Doctor,
            "Center" => Role::Center,
            "SubAdmin" => Role::SubAdmin,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Doctor => "Doctor",
            Role::Center => "Center",
            Role::SubAdmin => "SubAdmin",
            Role::Other(value) => value,
        }
    }

    /// The dashboard this role owns, if any.
    pub fn home_view(&self) -> Option<PortalView> {
        match self {
            Role::Doctor => Some(PortalView::Doctor),
            Role::Center => Some(PortalView::Institute),
            Role::SubAdmin | Role::Other(_) => None,
        }
    }
}

/// Where a caller ends up when they may not stay on the requested view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    Login,
    AdminIndex,
    Dashboard(PortalView),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// The caller may use the view. For doctors, `actor` is the doctor name
    /// used to query assigned studies.
    Granted { role: Role, actor: Option<String> },
    Redirect(Landing),
}

/// Decides whether the caller behind `user` may open `view`.
pub fn check_access(view: PortalView, user: &CurrentUser) -> Access {
    let role = Role::parse(user.role.as_deref().unwrap_or_default());
    if role.home_view() == Some(view) {
        let actor = match view {
            PortalView::Doctor => match user.display_name() {
                Some(name) => Some(name.to_string()),
                None => return Access::Redirect(Landing::Login),
            },
            PortalView::Institute => None,
        };
        return Access::Granted { role, actor };
    }
    Access::Redirect(landing_for(&role))
}

pub fn landing_for(role: &Role) -> Landing {
    match role {
        Role::Doctor => Landing::Dashboard(PortalView::Doctor),
        Role::Center => Landing::Dashboard(PortalView::Institute),
        Role::SubAdmin => Landing::AdminIndex,
        Role::Other(_) => Landing::Login,
    }
}

/// Any identity lookup failure sends the caller to sign-in.
pub fn check_identity(view: PortalView, user: Result<CurrentUser, ApiError>) -> Access {
    match user {
        Ok(user) => check_access(view, &user),
        Err(err) => {
            log::warn!("Identity check for {} view failed: {err}", view.label());
            Access::Redirect(Landing::Login)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn user(role: &str, doctor_name: Option<&str>) -> CurrentUser {
        CurrentUser {
            success: true,
            role: Some(role.to_string()),
            doctor_name: doctor_name.map(str::to_string),
            ..CurrentUser::default()
        }
    }

    #[test]
    fn doctor_is_granted_with_name() {
        let access = check_access(PortalView::Doctor, &user("Doctor", Some("Dr. Ada")));
        assert_eq!(
            access,
            Access::Granted {
                role: Role::Doctor,
                actor: Some("Dr. Ada".to_string()),
            }
        );
    }

    #[test]
    fn doctor_without_any_name_goes_to_login() {
        let access = check_access(PortalView::Doctor, &user("Doctor", None));
        assert_eq!(access, Access::Redirect(Landing::Login));
    }

    #[test]
    fn wrong_role_lands_on_its_own_dashboard() {
        assert_eq!(
            check_access(PortalView::Doctor, &user("Center", None)),
            Access::Redirect(Landing::Dashboard(PortalView::Institute))
        );
        assert_eq!(
            check_access(PortalView::Institute, &user("Doctor", Some("Ada"))),
            Access::Redirect(Landing::Dashboard(PortalView::Doctor))
        );
        assert_eq!(
            check_access(PortalView::Institute, &user("SubAdmin", None)),
            Access::Redirect(Landing::AdminIndex)
        );
        assert_eq!(
            check_access(PortalView::Institute, &user("doctor", None)),
            Access::Redirect(Landing::Login)
        );
    }

    #[test]
    fn center_is_granted_institute_view() {
        assert_eq!(
            check_access(PortalView::Institute, &user("Center", None)),
            Access::Granted {
                role: Role::Center,
                actor: None,
            }
        );
    }

    #[test]
    fn identity_errors_redirect_to_login() {
        let access = check_identity(
            PortalView::Doctor,
            Err(ApiError::Unauthorized(StatusCode::UNAUTHORIZED)),
        );
        assert_eq!(access, Access::Redirect(Landing::Login));
        assert_eq!(Role::parse("Center").as_str(), "Center");
        assert_eq!(Role::parse("Nurse").as_str(), "Nurse");
    }
}
