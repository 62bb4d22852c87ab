//! Static resource-agent metadata document emitted for
//! `action=metadata`, in the format cluster resource managers expect.

pub const RESOURCE_AGENT_XML: &str = r#"<resource-agent name="fencehub-agent"
  shortdesc="Fencing hub client">
  <longdesc>
  </longdesc>
  <vendor-url>
  </vendor-url>
  <parameters>
    <parameter name="action" unique="1" required="1">
      <content type="string" default="off"/>
      <shortdesc lang="en">
        Fencing action to perform: off, reboot, on
      </shortdesc>
    </parameter>
    <parameter name="protocol" unique="1" required="1">
      <content type="string"/>
      <shortdesc lang="en">
        Protocol for the connection to the fencing hub server: IPV4, IPV6
      </shortdesc>
    </parameter>
    <parameter name="ip_address" unique="1" required="1">
      <content type="string"/>
      <shortdesc lang="en">
        IP address of the fencing hub server
      </shortdesc>
    </parameter>
    <parameter name="tcp_port" unique="1" required="1">
      <content type="string"/>
      <shortdesc lang="en">
        TCP port of the fencing hub server
      </shortdesc>
    </parameter>
    <parameter name="secret" unique="1" required="1">
      <content type="string"/>
      <shortdesc lang="en">
        Password for sign in to the fencing hub server
      </shortdesc>
    </parameter>
  </parameters>
  <actions>
    <action name="off"/>
    <action name="reboot"/>
    <action name="on"/>
    <action name="metadata"/>
    <action name="status"/>
    <action name="list"/>
    <action name="monitor"/>
    <action name="start" timeout="20s"/>
    <action name="stop" timeout="20s"/>
  </actions>
</resource-agent>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_action() {
        for action in ["off", "on", "reboot", "metadata", "status", "list", "monitor", "start",
            "stop"]
        {
            assert!(
                RESOURCE_AGENT_XML.contains(&format!("<action name=\"{action}\"")),
                "missing action {action}"
            );
        }
    }
}
