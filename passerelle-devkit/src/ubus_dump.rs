/*!
Construction de sorties `ubus-cli`

Reproduit le format renvoyé par le device : ligne d'invite `> <path>`,
lignes marqueurs d'objet (`Path.`), puis `Path.Param="valeur"`.
*/

/// Dump d'un sous-arbre, lignes dans l'ordre d'ajout
#[derive(Debug, Clone, Default)]
pub struct UbusDump {
    lines: Vec<String>,
}

impl UbusDump {
    pub fn new(query: &str) -> Self {
        Self { lines: vec![format!("> {query}")] }
    }

    /// Marqueur d'objet `Path.`
    pub fn object(mut self, path: &str) -> Self {
        self.lines.push(format!("{path}."));
        self
    }

    /// Paramètre chaîne, quoté comme le fait le device
    pub fn text(mut self, key: &str, value: &str) -> Self {
        self.lines.push(format!("{key}=\"{value}\""));
        self
    }

    /// Paramètre numérique/booléen, non quoté
    pub fn raw(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.lines.push(format!("{key}={value}"));
        self
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// `SoftwareModules.?` avec les deux compteurs
    pub fn software_modules(deployment_units: usize, execution_units: usize) -> Self {
        Self::new("SoftwareModules.?")
            .object("SoftwareModules")
            .raw("SoftwareModules.DeploymentUnitNumberOfEntries", deployment_units)
            .raw("SoftwareModules.ExecutionEnvNumberOfEntries", 1)
            .raw("SoftwareModules.ExecutionUnitNumberOfEntries", execution_units)
    }

    pub fn deployment_unit(index: usize, duid: &str, name: &str, url: &str) -> Self {
        let p = format!("SoftwareModules.DeploymentUnit.{index}");
        Self::new(&format!("{p}.?"))
            .object(&p)
            .text(&format!("{p}.Alias"), &format!("cpe-{name}"))
            .text(&format!("{p}.DUID"), duid)
            .text(&format!("{p}.Description"), &format!("{name} container"))
            .text(&format!("{p}.Installed"), "2024-05-01T10:00:00Z")
            .text(&format!("{p}.LastUpdate"), "2024-05-01T10:00:00Z")
            .text(&format!("{p}.Name"), name)
            .text(&format!("{p}.Status"), "Installed")
            .text(&format!("{p}.URL"), url)
            .text(&format!("{p}.UUID"), duid)
            .text(&format!("{p}.Vendor"), "acme")
            .text(&format!("{p}.Version"), "1.0")
    }

    pub fn execution_unit(index: usize, euid: &str, status: &str) -> Self {
        let p = format!("SoftwareModules.ExecutionUnit.{index}");
        Self::new(&format!("{p}.?"))
            .object(&p)
            .text(&format!("{p}.Alias"), &format!("eu-{euid}"))
            .text(&format!("{p}.EUID"), euid)
            .text(&format!("{p}.LastUpdate"), "2024-05-02T08:00:00Z")
            .text(&format!("{p}.Name"), euid)
            .text(&format!("{p}.Status"), status)
    }

    /// `X_TINNO-COM_SelfHeal.?` : seuils + historique (raison, date)
    pub fn selfheal(cpu: i64, memory: i64, reboots: &[(&str, &str)]) -> Self {
        let root = "X_TINNO-COM_SelfHeal";
        let mut dump = Self::new(&format!("{root}.?"))
            .object(root)
            .raw(&format!("{root}.AvgCPUThreshold"), cpu)
            .raw(&format!("{root}.AvgMemoryThreshold"), memory)
            .raw(&format!("{root}.Enable"), 1)
            .raw(&format!("{root}.RebootNumberOfEntries"), reboots.len());
        for (i, (reason, time)) in reboots.iter().enumerate() {
            let p = format!("{root}.Reboot.{}", i + 1);
            dump = dump.object(&p).text(&format!("{p}.Reason"), reason).text(&format!("{p}.Time"), time);
        }
        dump
    }
}
