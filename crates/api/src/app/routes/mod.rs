use axum::Router;

use crate::app::AppState;

pub mod system;

pub const API_VERSION: &str = "v1";

/// Versioned route groups served under `/api/v1/<segment>`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ApiModule {
    Auth,
    Users,
    Expenses,
    Categories,
    Reports,
    Settings,
    Maps,
    Analytics,
    AdvancedReports,
    Budgets,
}

impl ApiModule {
    /// Mount order.
    pub const ALL: [ApiModule; 10] = [
        ApiModule::Auth,
        ApiModule::Users,
        ApiModule::Expenses,
        ApiModule::Categories,
        ApiModule::Reports,
        ApiModule::Settings,
        ApiModule::Maps,
        ApiModule::Analytics,
        ApiModule::AdvancedReports,
        ApiModule::Budgets,
    ];

    pub fn segment(self) -> &'static str {
        match self {
            ApiModule::Auth => "auth",
            ApiModule::Users => "users",
            ApiModule::Expenses => "expenses",
            ApiModule::Categories => "categories",
            ApiModule::Reports => "reports",
            ApiModule::Settings => "settings",
            ApiModule::Maps => "maps",
            ApiModule::Analytics => "analytics",
            ApiModule::AdvancedReports => "advanced-reports",
            ApiModule::Budgets => "budgets",
        }
    }

    pub fn mount_path(self) -> String {
        format!("/api/{API_VERSION}/{}", self.segment())
    }

    /// Tag name used in the API document.
    pub fn tag(self) -> &'static str {
        match self {
            ApiModule::Auth => "Auth",
            ApiModule::Users => "Users",
            ApiModule::Expenses => "Expenses",
            ApiModule::Categories => "Categories",
            ApiModule::Reports => "Reports",
            ApiModule::Settings => "Settings",
            ApiModule::Maps => "Maps",
            ApiModule::Analytics => "Analytics",
            ApiModule::AdvancedReports => "Advanced Reports",
            ApiModule::Budgets => "Budgets",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ApiModule::Auth => "Registration, login and token management",
            ApiModule::Users => "User profiles and account administration",
            ApiModule::Expenses => "Expense records",
            ApiModule::Categories => "Expense categories",
            ApiModule::Reports => "Standard expense reports",
            ApiModule::Settings => "Per-user application settings",
            ApiModule::Maps => "Location lookups for expenses",
            ApiModule::Analytics => "Spending analytics",
            ApiModule::AdvancedReports => "Custom and scheduled reports",
            ApiModule::Budgets => "Budget planning and tracking",
        }
    }
}

/// One router per route group. Groups that were never mounted stay empty,
/// so every request under their prefix falls through to the 404 handler.
#[derive(Default)]
pub struct RouteModules {
    mounted: Vec<(ApiModule, Router<AppState>)>,
}

impl RouteModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `router` for `module`, replacing any earlier router for it.
    pub fn mount(mut self, module: ApiModule, router: Router<AppState>) -> Self {
        self.mounted.retain(|(m, _)| *m != module);
        self.mounted.push((module, router));
        self
    }

    pub fn is_mounted(&self, module: ApiModule) -> bool {
        self.mounted.iter().any(|(m, _)| *m == module)
    }

    /// Nest each mounted group under its prefix, in [`ApiModule::ALL`] order.
    pub fn into_router(mut self) -> Router<AppState> {
        let mut router = Router::new();
        for module in ApiModule::ALL {
            let Some(idx) = self.mounted.iter().position(|(m, _)| *m == module) else {
                continue;
            };
            let (_, group) = self.mounted.swap_remove(idx);
            tracing::debug!(path = %module.mount_path(), "mounting route group");
            router = router.nest(&module.mount_path(), group);
        }
        router
    }
}
